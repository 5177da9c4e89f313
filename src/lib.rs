//! # encounter-kernel
//!
//! Deterministic normalization and duplicate resolution for raid encounter
//! analysis dumps.
//!
//! The kernel answers two questions for every uploaded dump:
//!
//! > Which flat, uniquely keyed records does this fight produce?
//! >
//! > Is this fight already known from another participant's upload?
//!
//! ## Core Contract
//!
//! 1. Normalize a nested dump into phase, player, damage, buff, event and
//!    mechanic records, buffered and committed as one batch
//! 2. Fingerprint the roster and bucket the start time into two overlapping
//!    guards, so uploads of the same fight collide on at least one
//! 3. Register-or-fetch against a store enforcing both guard constraints
//!
//! ## Architecture
//!
//! ```text
//! Dump → DumpNormalizer → AttributeSet ─────────────┐
//!            ↓                                       ↓
//!     IdentityResolver → EncounterIdentity → EncounterStore (Postgres or Memory)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same dump + same configuration → record-for-record identical sets
//! - Attribute iteration is canonical (by kind, then key columns)
//! - Roster fingerprints are independent of roster order

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod canonical;
pub mod store;
pub mod normalizer;
pub mod aggregate;
pub mod identity;
pub mod url_id;
pub mod config;
pub mod ingest;

// Re-exports
pub use types::{
    Attribute, AttributeKey, AttributeKind, BuffAttribute, DamageAttribute, DamageRates,
    DamageReport, DuplicateAttributeError, Dump, EncounterId, EncounterInstance, EventAttribute,
    MalformedDumpError, MechanicAttribute, PhaseAttribute, PlayerAttribute, AGGREGATE_ACTOR,
    AGGREGATE_PHASE, CONDITION_SKILLS, CONDI_SKILL, POWER_SKILL, RAW_VALUE_BUFFS,
    SHIELDED_SKILL, TICKS_PER_SECOND,
};
pub use store::{
    AttributeCounts, AttributeFilter, AttributeSet, EncounterRecord, EncounterStore,
    IdentityRaceError, InMemoryEncounterStore, LifecycleEvent, LifecycleObserver, NewEncounter,
    NoOpObserver, RecordingObserver, RegistrationOutcome, StoreError,
};
#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresEncounterStore};
pub use normalizer::{DumpNormalizer, NormalizeError, NormalizedEncounter, NormalizerConfig};
pub use aggregate::{is_condition, summarize_damage, summarize_events, DamageSummary, EventSummary};
pub use identity::{
    fingerprint, fingerprint_folded, guard_keys, looks_like_account_name, EncounterIdentity,
    GuardKeys, IdentityConfig, IdentityResolver, WeeklyReset, DEFAULT_START_RESOLUTION,
};
pub use url_id::{UrlIdGenerator, WordList, WordListError, DEFAULT_URL_ID_WORDS};
pub use config::{ConfigError, KernelConfig};
pub use ingest::{EncounterIngestor, IngestError, IngestOutcome, UploadMetadata};
pub use canonical::{canonical_hash, canonical_hash_hex, content_hash_128_hex, to_canonical_bytes};

/// Version of the attribute record layout.
///
/// Bump when normalization output changes, so stored sets can be re-normalized.
pub const ENCOUNTER_KERNEL_SCHEMA_VERSION: &str = "1.0.0";
