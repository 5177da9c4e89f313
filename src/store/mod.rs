//! Encounter and attribute storage.
//!
//! An [`EncounterStore`] owns registered encounters and the attribute
//! records normalized from their dumps. Backends enforce two uniqueness
//! constraints per area and roster fingerprint, one on each start guard,
//! and delete an encounter's attributes together with the encounter.

pub mod attributes;
pub mod memory;
pub mod schema;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::identity::{EncounterIdentity, GuardKeys};
use crate::normalizer::NormalizedEncounter;
use crate::types::{DuplicateAttributeError, EncounterId, EncounterInstance};

pub use attributes::{AttributeCounts, AttributeFilter, AttributeSet};
pub use memory::InMemoryEncounterStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresEncounterStore};

/// Another upload already holds one of the identity guards.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("encounter {existing} already registered for this roster and start")]
pub struct IdentityRaceError {
    /// The encounter that won the race.
    pub existing: EncounterId,
}

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Identity guard already taken.
    #[error(transparent)]
    IdentityRace(#[from] IdentityRaceError),
    /// Attribute uniqueness violated.
    #[error(transparent)]
    Duplicate(#[from] DuplicateAttributeError),
    /// Encounter does not exist.
    #[error("encounter not found: {0}")]
    NotFound(EncounterId),
    /// Encounter already has committed attributes.
    #[error("encounter {0} already has attributes")]
    AlreadyNormalized(EncounterId),
    /// URL id already in use.
    #[error("url id already in use: {0}")]
    UrlIdConflict(String),
    /// Backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// An encounter about to be registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEncounter {
    /// Id to register under.
    pub id: EncounterId,
    /// Human-readable URL id.
    pub url_id: String,
    /// Game area the encounter took place in.
    pub area_id: u32,
    /// Parsed encounter instance.
    pub instance: EncounterInstance,
    /// Original upload filename.
    pub filename: String,
    /// Upload time, unix seconds.
    pub uploaded_at: i64,
    /// Uploading account, if known.
    pub uploaded_by: Option<String>,
    /// Roster fingerprint, guards and week.
    pub identity: EncounterIdentity,
}

/// A registered encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterRecord {
    /// Encounter id.
    pub id: EncounterId,
    /// Human-readable URL id.
    pub url_id: String,
    /// Game area.
    pub area_id: u32,
    /// Start, unix seconds.
    pub started_at: i64,
    /// Duration, seconds.
    pub duration: f64,
    /// Whether the boss was defeated.
    pub success: bool,
    /// Original upload filename.
    pub filename: String,
    /// Upload time, unix seconds.
    pub uploaded_at: i64,
    /// Uploading account, if known.
    pub uploaded_by: Option<String>,
    /// Roster fingerprint.
    pub account_hash: String,
    /// Start guards.
    pub guards: GuardKeys,
    /// Start of the reporting week, unix seconds.
    pub week: i64,
    /// Attached encounter instance.
    pub instance: EncounterInstance,
}

impl From<NewEncounter> for EncounterRecord {
    fn from(new: NewEncounter) -> Self {
        Self {
            id: new.id,
            url_id: new.url_id,
            area_id: new.area_id,
            started_at: new.instance.started_at(),
            duration: new.instance.duration(),
            success: new.instance.success,
            filename: new.filename,
            uploaded_at: new.uploaded_at,
            uploaded_by: new.uploaded_by,
            account_hash: new.identity.fingerprint,
            guards: new.identity.guards,
            week: new.identity.week,
            instance: new.instance,
        }
    }
}

impl EncounterRecord {
    /// Whether `identity` collides with this record in `area_id`.
    pub fn matches_identity(&self, area_id: u32, identity: &EncounterIdentity) -> bool {
        self.area_id == area_id
            && self.account_hash == identity.fingerprint
            && self.guards.shares_guard(&identity.guards)
    }
}

/// Result of insert-or-fetch registration.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    /// A new encounter was registered.
    Created(EncounterRecord),
    /// An existing encounter matched the identity.
    Merged(EncounterRecord),
}

impl RegistrationOutcome {
    /// The registered or matched record.
    pub fn record(&self) -> &EncounterRecord {
        match self {
            Self::Created(record) | Self::Merged(record) => record,
        }
    }

    /// Whether the encounter was newly created.
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Encounter lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// An encounter was registered.
    Created {
        /// Encounter id.
        id: EncounterId,
        /// URL id.
        url_id: String,
    },
    /// An encounter and its attributes were deleted.
    Destroyed {
        /// Encounter id.
        id: EncounterId,
        /// URL id.
        url_id: String,
        /// Original upload filename.
        filename: String,
    },
}

/// Receives lifecycle notifications from a store.
///
/// Observers run after the store has released its locks.
pub trait LifecycleObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &LifecycleEvent);
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NoOpObserver;

impl LifecycleObserver for NoOpObserver {
    fn on_event(&self, _event: &LifecycleEvent) {}
}

/// Observer that keeps every event, for tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far, in delivery order.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }
}

impl LifecycleObserver for RecordingObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Trait for encounter storage backends.
///
/// Implementations must make `commit_attributes`, `replace_normalized` and
/// `delete` atomic: readers see either all of an encounter's attributes or
/// none of them.
#[async_trait]
pub trait EncounterStore: Send + Sync {
    /// Insert a new encounter.
    ///
    /// Fails with [`StoreError::IdentityRace`] when either guard of the
    /// identity is already held in the same area by the same roster.
    async fn insert_encounter(&self, encounter: NewEncounter) -> Result<EncounterRecord, StoreError>;

    /// Find the encounter holding either guard of `identity` in `area_id`.
    async fn find_by_identity(
        &self,
        area_id: u32,
        identity: &EncounterIdentity,
    ) -> Result<Option<EncounterRecord>, StoreError>;

    /// Fetch an encounter by id.
    async fn get(&self, id: EncounterId) -> Result<Option<EncounterRecord>, StoreError>;

    /// Attach the first set of attributes to an encounter.
    async fn commit_attributes(&self, id: EncounterId, attributes: AttributeSet) -> Result<(), StoreError>;

    /// Replace an encounter's instance and all of its attributes with a
    /// fresh normalization.
    ///
    /// `instance`, `duration` and `success` follow the new instance. The
    /// identity columns (start, guards, week) keep their registered values.
    async fn replace_normalized(
        &self,
        id: EncounterId,
        normalized: NormalizedEncounter,
    ) -> Result<(), StoreError>;

    /// Fetch an encounter's attributes matching `filter`.
    async fn query_attributes(
        &self,
        id: EncounterId,
        filter: &AttributeFilter,
    ) -> Result<AttributeSet, StoreError>;

    /// Delete an encounter and its attributes. Returns whether it existed.
    async fn delete(&self, id: EncounterId) -> Result<bool, StoreError>;

    /// Insert-or-fetch.
    ///
    /// Returns the existing encounter when the identity is already taken,
    /// including when another writer wins the insert.
    async fn register(&self, encounter: NewEncounter) -> Result<RegistrationOutcome, StoreError> {
        if let Some(existing) = self.find_by_identity(encounter.area_id, &encounter.identity).await? {
            return Ok(RegistrationOutcome::Merged(existing));
        }

        match self.insert_encounter(encounter).await {
            Ok(record) => Ok(RegistrationOutcome::Created(record)),
            Err(StoreError::IdentityRace(race)) => {
                tracing::debug!(existing = %race.existing, "Lost registration race");
                self.get(race.existing)
                    .await?
                    .map(RegistrationOutcome::Merged)
                    .ok_or(StoreError::NotFound(race.existing))
            }
            Err(e) => Err(e),
        }
    }
}
