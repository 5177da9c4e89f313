//! Encounter identity and instance types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::dump::{CategorySection, MalformedDumpError};

/// Ticks per second in the upstream tool's simulation clock.
pub const TICKS_PER_SECOND: f64 = 100.0;

/// Unique identifier for a registered encounter.
///
/// Wraps a UUID and implements `Ord` for deterministic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EncounterId(Uuid);

impl EncounterId {
    /// Create a new EncounterId from a UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh random EncounterId.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for EncounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EncounterId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// One boss fight as reported by the upstream tool.
///
/// Owns every attribute record normalized from the same dump. Instances are
/// never patched; re-normalization replaces it together with the record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterInstance {
    /// Boss identifier (all boss names of the dump, concatenated).
    pub boss: String,
    /// Challenge-mode flag.
    pub cm: bool,
    /// Wall-clock start of the fight.
    pub start_timestamp: DateTime<Utc>,
    /// Simulation tick at which the fight started.
    pub start_tick: u64,
    /// Simulation tick at which the fight ended.
    pub end_tick: u64,
    /// Whether the boss was defeated.
    pub success: bool,
    /// Version string of the tool that produced the recording.
    pub evtc_version: String,
}

impl EncounterInstance {
    /// Build an instance from the category section of a dump.
    pub fn from_category(category: &CategorySection) -> Result<Self, MalformedDumpError> {
        let encounter = &category.encounter;
        let start_timestamp = timestamp_from_epoch(encounter.start)?;

        Ok(Self {
            boss: category.boss.identifier(),
            cm: encounter.cm,
            start_timestamp,
            start_tick: encounter.start_tick,
            end_tick: encounter.end_tick,
            success: encounter.success,
            evtc_version: encounter.evtc_version.clone(),
        })
    }

    /// Length of the fight in ticks.
    pub fn duration_ticks(&self) -> u64 {
        self.end_tick.saturating_sub(self.start_tick)
    }

    /// Length of the fight in seconds.
    pub fn duration(&self) -> f64 {
        self.duration_ticks() as f64 / TICKS_PER_SECOND
    }

    /// Start of the fight as unix seconds.
    pub fn started_at(&self) -> i64 {
        self.start_timestamp.timestamp()
    }
}

fn timestamp_from_epoch(start: f64) -> Result<DateTime<Utc>, MalformedDumpError> {
    if !start.is_finite() {
        return Err(MalformedDumpError::InvalidTimestamp(start.to_string()));
    }
    let secs = start.floor();
    let nanos = ((start - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::<Utc>::from_timestamp(secs as i64, nanos)
        .ok_or_else(|| MalformedDumpError::InvalidTimestamp(start.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_from_epoch() {
        let ts = timestamp_from_epoch(1_500_000_000.0).unwrap();
        assert_eq!(ts.timestamp(), 1_500_000_000);

        let ts = timestamp_from_epoch(1_500_000_000.5).unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 500);

        assert!(timestamp_from_epoch(f64::NAN).is_err());
    }

    #[test]
    fn test_duration() {
        let instance = EncounterInstance {
            boss: "Vale Guardian".to_string(),
            cm: false,
            start_timestamp: timestamp_from_epoch(0.0).unwrap(),
            start_tick: 1_000,
            end_tick: 61_000,
            success: true,
            evtc_version: "EVTC20180101".to_string(),
        };
        assert_eq!(instance.duration_ticks(), 60_000);
        assert_eq!(instance.duration(), 600.0);
    }
}
