//! Kernel configuration.
//!
//! All settings can be configured via environment variables:
//! - `ENCOUNTER_START_RESOLUTION`: Guard bucketing window in seconds (default: 60)
//! - `ENCOUNTER_FOLD_ACCOUNT_CASE`: Lowercase account ids before fingerprinting (default: false)
//! - `ENCOUNTER_RESET_WEEKDAY`: Weekly reset day, e.g. `Mon` (default: Mon)
//! - `ENCOUNTER_RESET_HOUR`: Weekly reset hour, UTC (default: 7)
//! - `ENCOUNTER_RESET_MINUTE`: Weekly reset minute (default: 30)
//! - `ENCOUNTER_AGGREGATE_PHASE`: Name of the whole-fight phase (default: All)
//! - `ENCOUNTER_AGGREGATE_ACTOR`: Name of the "everyone" actor (default: *All)
//! - `ENCOUNTER_URL_ID_WORDS`: Words per URL id (default: 5)
//! - `ENCOUNTER_WORD_LIST`: Path to the URL id word list (one word per line)

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::identity::IdentityConfig;
use crate::normalizer::NormalizerConfig;
use crate::url_id::{UrlIdGenerator, WordList, WordListError, DEFAULT_URL_ID_WORDS};

/// Error type for configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting has an unusable value.
    #[error("invalid setting {name}: {reason}")]
    Invalid {
        /// Setting name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// The word list could not be loaded.
    #[error(transparent)]
    WordList(#[from] WordListError),
}

/// Top-level configuration threaded through the kernel's constructors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Dump normalizer settings.
    pub normalizer: NormalizerConfig,
    /// Identity resolution settings.
    pub identity: IdentityConfig,
    /// Words per URL id.
    pub url_id_words: usize,
    /// Word list for URL ids.
    pub word_list_path: Option<PathBuf>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            normalizer: NormalizerConfig::default(),
            identity: IdentityConfig::default(),
            url_id_words: DEFAULT_URL_ID_WORDS,
            word_list_path: None,
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl KernelConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut identity = defaults.identity;
        let mut normalizer = defaults.normalizer;

        if let Some(resolution) = env_parse("ENCOUNTER_START_RESOLUTION") {
            identity.start_resolution = resolution;
        }
        if let Some(fold) = env_parse("ENCOUNTER_FOLD_ACCOUNT_CASE") {
            identity.fold_account_case = fold;
        }
        if let Some(weekday) = env_parse::<Weekday>("ENCOUNTER_RESET_WEEKDAY") {
            identity.weekly_reset.weekday = weekday;
        }
        if let Some(hour) = env_parse("ENCOUNTER_RESET_HOUR") {
            identity.weekly_reset.hour = hour;
        }
        if let Some(minute) = env_parse("ENCOUNTER_RESET_MINUTE") {
            identity.weekly_reset.minute = minute;
        }
        if let Ok(phase) = std::env::var("ENCOUNTER_AGGREGATE_PHASE") {
            normalizer.aggregate_phase = phase;
        }
        if let Ok(actor) = std::env::var("ENCOUNTER_AGGREGATE_ACTOR") {
            normalizer.aggregate_actor = actor;
        }

        Self {
            normalizer,
            identity,
            url_id_words: env_parse("ENCOUNTER_URL_ID_WORDS").unwrap_or(defaults.url_id_words),
            word_list_path: std::env::var_os("ENCOUNTER_WORD_LIST").map(PathBuf::from),
        }
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.start_resolution <= 0 {
            return Err(ConfigError::Invalid {
                name: "start_resolution",
                reason: format!("must be positive, got {}", self.identity.start_resolution),
            });
        }
        let reset = &self.identity.weekly_reset;
        if reset.hour > 23 || reset.minute > 59 {
            return Err(ConfigError::Invalid {
                name: "weekly_reset",
                reason: format!("{:02}:{:02} is not a time of day", reset.hour, reset.minute),
            });
        }
        if self.normalizer.aggregate_phase.is_empty() {
            return Err(ConfigError::Invalid {
                name: "aggregate_phase",
                reason: "must not be empty".to_string(),
            });
        }
        if self.normalizer.aggregate_actor.is_empty() {
            return Err(ConfigError::Invalid {
                name: "aggregate_actor",
                reason: "must not be empty".to_string(),
            });
        }
        if self.url_id_words == 0 {
            return Err(ConfigError::Invalid {
                name: "url_id_words",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Load the configured word list and build a URL id generator.
    ///
    /// Returns `None` when no word list is configured.
    pub fn url_id_generator(&self) -> Result<Option<UrlIdGenerator>, ConfigError> {
        match &self.word_list_path {
            Some(path) => {
                let words = WordList::from_path(path)?;
                Ok(Some(UrlIdGenerator::new(words, self.url_id_words)?))
            }
            None => Ok(None),
        }
    }
}
