//! Encounter identity resolution.
//!
//! Several participants may upload the same fight. Uploads are grouped by a
//! roster fingerprint and bucketed by start time so that reports of the same
//! fight with slightly different start times converge on one encounter.
//!
//! ## Guard keys
//!
//! Start times are rounded to `resolution` twice, once as-is (`full`) and
//! once shifted by half a window (`half`). The store enforces uniqueness on
//! (area, fingerprint, full) and on (area, fingerprint, half) separately; two
//! starts a few seconds apart share at least one of the two buckets even when
//! a window boundary falls between them.
//!
//! Rounding is half-to-even on exact integers, so guards computed here match
//! values already stored by earlier tooling.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::canonical::content_hash_128_hex;

/// Default bucketing window for start guards, in seconds.
pub const DEFAULT_START_RESOLUTION: i64 = 60;

/// Separator between account identifiers in the fingerprint input.
pub const FINGERPRINT_SEPARATOR: &str = ":";

/// Fingerprint of a roster: 128-bit hash of the sorted, colon-joined ids.
///
/// Independent of input order.
pub fn fingerprint<I, S>(account_ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ids: Vec<String> = account_ids
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect();
    ids.sort();
    content_hash_128_hex(ids.join(FINGERPRINT_SEPARATOR).as_bytes())
}

/// Fingerprint after lowercasing every id, for stores that fold case.
pub fn fingerprint_folded<I, S>(account_ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fingerprint(account_ids.into_iter().map(|s| s.as_ref().to_lowercase()))
}

/// Whether an id contains the `Name.1234` account shape anywhere.
pub fn looks_like_account_name(account_id: &str) -> bool {
    static ACCOUNT_NAME_RE: OnceLock<Regex> = OnceLock::new();
    ACCOUNT_NAME_RE
        .get_or_init(|| Regex::new(r"\S+\.\d{4}").expect("account name pattern compiles"))
        .is_match(account_id)
}

/// The two rounded start times used for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuardKeys {
    /// Start rounded to the nearest window.
    pub full: i64,
    /// Start shifted by half a window, then rounded.
    pub half: i64,
}

impl GuardKeys {
    /// Whether two uploads fall into a common bucket.
    pub fn shares_guard(&self, other: &GuardKeys) -> bool {
        self.full == other.full || self.half == other.half
    }
}

/// Compute guard keys for a start time (unix seconds).
///
/// A non-positive `resolution` falls back to [`DEFAULT_START_RESOLUTION`].
pub fn guard_keys(started_at: i64, resolution: i64) -> GuardKeys {
    let resolution = if resolution > 0 {
        resolution
    } else {
        DEFAULT_START_RESOLUTION
    };
    // half = round((s + r/2) / r) * r, computed as round((2s + r) / 2r) to stay integral.
    GuardKeys {
        full: round_half_even_div(started_at, resolution) * resolution,
        half: round_half_even_div(2 * started_at + resolution, 2 * resolution) * resolution,
    }
}

/// `round(num / den)` with ties to even, for `den > 0`.
fn round_half_even_div(num: i64, den: i64) -> i64 {
    let quotient = num.div_euclid(den);
    let twice_rem = 2 * num.rem_euclid(den);
    if twice_rem > den || (twice_rem == den && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    }
}

/// Weekly reset boundary used to bucket encounters into reporting weeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyReset {
    /// Day of the reset.
    pub weekday: Weekday,
    /// Hour of the reset (UTC).
    pub hour: u32,
    /// Minute of the reset.
    pub minute: u32,
}

impl Default for WeeklyReset {
    fn default() -> Self {
        Self {
            weekday: Weekday::Mon,
            hour: 7,
            minute: 30,
        }
    }
}

impl WeeklyReset {
    /// Most recent reset at or before `instant`.
    pub fn week_for(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let days_back = (7 + instant.weekday().num_days_from_monday()
            - self.weekday.num_days_from_monday())
            % 7;
        let date = instant.date_naive() - Duration::days(i64::from(days_back));
        let time = NaiveTime::from_hms_opt(self.hour.min(23), self.minute.min(59), 0)
            .unwrap_or_default();
        let reset = Utc.from_utc_datetime(&date.and_time(time));
        if reset > instant {
            reset - Duration::weeks(1)
        } else {
            reset
        }
    }

    /// [`week_for`](Self::week_for) on unix seconds.
    pub fn week_for_timestamp(&self, started_at: i64) -> i64 {
        match DateTime::<Utc>::from_timestamp(started_at, 0) {
            Some(instant) => self.week_for(instant).timestamp(),
            None => started_at,
        }
    }
}

/// Identity resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Guard bucketing window, seconds.
    pub start_resolution: i64,
    /// Lowercase account ids before fingerprinting.
    pub fold_account_case: bool,
    /// Weekly reporting boundary.
    pub weekly_reset: WeeklyReset,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            start_resolution: DEFAULT_START_RESOLUTION,
            fold_account_case: false,
            weekly_reset: WeeklyReset::default(),
        }
    }
}

/// Everything needed to look up or register an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncounterIdentity {
    /// Roster fingerprint.
    pub fingerprint: String,
    /// Start guards.
    pub guards: GuardKeys,
    /// Start of the reporting week, unix seconds.
    pub week: i64,
}

/// Computes [`EncounterIdentity`] values under one configuration.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    config: IdentityConfig,
}

impl IdentityResolver {
    /// Create a resolver.
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Resolve the identity of an upload from its roster and start time.
    pub fn resolve<I, S>(&self, account_ids: I, started_at: i64) -> EncounterIdentity
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fingerprint = if self.config.fold_account_case {
            fingerprint_folded(account_ids)
        } else {
            fingerprint(account_ids)
        };
        EncounterIdentity {
            fingerprint,
            guards: guard_keys(started_at, self.config.start_resolution),
            week: self.config.weekly_reset.week_for_timestamp(started_at),
        }
    }
}
