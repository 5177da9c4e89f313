//! Upload ingestion.
//!
//! Ties the pieces together for one uploaded dump:
//!
//! 1. Normalize the dump into an instance and a buffered attribute set
//! 2. Resolve the roster fingerprint, start guards and reporting week
//! 3. Register the encounter, or fetch the one already holding a guard
//! 4. Commit the attributes when the encounter has none yet
//!
//! A malformed dump is rejected before anything reaches the store. If the
//! attribute commit of a new encounter fails, the encounter is deleted again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{ConfigError, KernelConfig};
use crate::identity::{looks_like_account_name, IdentityResolver};
use crate::normalizer::{DumpNormalizer, NormalizeError};
use crate::store::{EncounterStore, NewEncounter, RegistrationOutcome, StoreError};
use crate::types::{DuplicateAttributeError, Dump, EncounterId, MalformedDumpError};
use crate::url_id::UrlIdGenerator;

/// Registration attempts before a URL id collision is reported.
pub const MAX_URL_ID_ATTEMPTS: usize = 8;

/// Upload context supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    /// Game area the dump belongs to.
    pub area_id: u32,
    /// Original upload filename.
    pub filename: String,
    /// Upload time, unix seconds.
    pub uploaded_at: i64,
    /// Uploading account, if known.
    pub uploaded_by: Option<String>,
}

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The upload registered a new encounter.
    Created {
        /// Encounter id.
        id: EncounterId,
        /// URL id.
        url_id: String,
    },
    /// The upload matched an existing encounter.
    Merged {
        /// Existing encounter id.
        id: EncounterId,
        /// Existing URL id.
        url_id: String,
    },
}

impl IngestOutcome {
    /// The resulting encounter id.
    pub fn encounter_id(&self) -> EncounterId {
        match self {
            Self::Created { id, .. } | Self::Merged { id, .. } => *id,
        }
    }

    /// The resulting URL id.
    pub fn url_id(&self) -> &str {
        match self {
            Self::Created { url_id, .. } | Self::Merged { url_id, .. } => url_id,
        }
    }
}

/// Error type for ingestion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// The dump lacks required data. Nothing was persisted.
    #[error("upload rejected: {0}")]
    Rejected(#[from] MalformedDumpError),
    /// The dump produced conflicting records. Nothing was persisted.
    #[error("upload rejected: {0}")]
    Corrupt(#[from] DuplicateAttributeError),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<NormalizeError> for IngestError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::Malformed(e) => Self::Rejected(e),
            NormalizeError::Duplicate(e) => Self::Corrupt(e),
        }
    }
}

/// Ingests uploaded dumps into an [`EncounterStore`].
#[derive(Debug)]
pub struct EncounterIngestor<S> {
    store: Arc<S>,
    normalizer: DumpNormalizer,
    resolver: IdentityResolver,
    url_ids: Option<UrlIdGenerator>,
}

impl<S: EncounterStore> EncounterIngestor<S> {
    /// Create an ingestor. URL ids fall back to the encounter uuid until a
    /// generator is attached with [`with_url_ids`](Self::with_url_ids).
    pub fn new(store: Arc<S>, config: &KernelConfig) -> Self {
        Self {
            store,
            normalizer: DumpNormalizer::new(config.normalizer.clone()),
            resolver: IdentityResolver::new(config.identity.clone()),
            url_ids: None,
        }
    }

    /// Validate `config` and build an ingestor, loading the word list when
    /// one is configured.
    pub fn from_config(store: Arc<S>, config: &KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let url_ids = config.url_id_generator()?;
        Ok(Self {
            url_ids,
            ..Self::new(store, config)
        })
    }

    /// Use `generator` for URL ids.
    pub fn with_url_ids(mut self, generator: UrlIdGenerator) -> Self {
        self.url_ids = Some(generator);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Interpret a JSON tree as a dump and ingest it.
    pub async fn ingest_value(&self, value: Value, meta: UploadMetadata) -> Result<IngestOutcome, IngestError> {
        let dump = Dump::from_value(value)?;
        self.ingest(&dump, meta).await
    }

    /// Ingest one dump.
    pub async fn ingest(&self, dump: &Dump, meta: UploadMetadata) -> Result<IngestOutcome, IngestError> {
        let span = info_span!("ingest", area_id = meta.area_id, filename = %meta.filename);
        self.ingest_inner(dump, meta).instrument(span).await
    }

    async fn ingest_inner(&self, dump: &Dump, meta: UploadMetadata) -> Result<IngestOutcome, IngestError> {
        let normalized = self.normalizer.normalize(dump).map_err(|e| {
            warn!(error = %e, "Rejecting upload");
            IngestError::from(e)
        })?;

        let account_ids = normalized.account_ids();
        for account_id in &account_ids {
            if !looks_like_account_name(account_id) {
                warn!(account_id = %account_id, "Account id does not look like Name.1234");
            }
        }
        let identity = self
            .resolver
            .resolve(&account_ids, normalized.instance.started_at());

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            let id = EncounterId::random();
            let encounter = NewEncounter {
                id,
                url_id: self.next_url_id(id),
                area_id: meta.area_id,
                instance: normalized.instance.clone(),
                filename: meta.filename.clone(),
                uploaded_at: meta.uploaded_at,
                uploaded_by: meta.uploaded_by.clone(),
                identity: identity.clone(),
            };
            match self.store.register(encounter).await {
                Ok(outcome) => break outcome,
                Err(StoreError::UrlIdConflict(url_id)) if attempt < MAX_URL_ID_ATTEMPTS => {
                    debug!(url_id = %url_id, attempt, "URL id taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };

        let records = normalized.attributes.len();
        match outcome {
            RegistrationOutcome::Created(record) => {
                match self.store.commit_attributes(record.id, normalized.attributes).await {
                    Ok(()) | Err(StoreError::AlreadyNormalized(_)) => {}
                    Err(e) => {
                        warn!(encounter_id = %record.id, error = %e, "Attribute commit failed, rolling back");
                        if let Err(cleanup) = self.store.delete(record.id).await {
                            warn!(encounter_id = %record.id, error = %cleanup, "Rollback failed");
                        }
                        return Err(e.into());
                    }
                }
                info!(encounter_id = %record.id, url_id = %record.url_id, records, "Encounter created");
                Ok(IngestOutcome::Created {
                    id: record.id,
                    url_id: record.url_id,
                })
            }
            RegistrationOutcome::Merged(record) => {
                // The winner may not have committed yet; whichever commit lands first stands.
                match self.store.commit_attributes(record.id, normalized.attributes).await {
                    Ok(()) => debug!(encounter_id = %record.id, records, "Filled in attributes of merged encounter"),
                    Err(StoreError::AlreadyNormalized(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                info!(encounter_id = %record.id, url_id = %record.url_id, "Upload merged into existing encounter");
                Ok(IngestOutcome::Merged {
                    id: record.id,
                    url_id: record.url_id,
                })
            }
        }
    }

    /// Re-normalize a dump for an existing encounter, replacing its instance
    /// and records.
    pub async fn reingest(&self, id: EncounterId, dump: &Dump) -> Result<usize, IngestError> {
        let normalized = self.normalizer.normalize(dump)?;
        let records = normalized.attributes.len();
        self.store.replace_normalized(id, normalized).await?;
        info!(encounter_id = %id, records, "Encounter re-normalized");
        Ok(records)
    }

    fn next_url_id(&self, id: EncounterId) -> String {
        match &self.url_ids {
            Some(generator) => generator.generate(),
            None => id.as_uuid().simple().to_string(),
        }
    }
}
