//! Integration tests for the ingest pipeline.
//!
//! Covers duplicate detection across uploads, cascade delete, rejection of
//! malformed dumps and recovery when another upload wins registration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use encounter_kernel::{
    AttributeFilter, AttributeSet, Dump, DumpNormalizer, EncounterId, EncounterIdentity,
    EncounterIngestor, EncounterRecord, EncounterStore, IdentityResolver, InMemoryEncounterStore,
    IngestError, IngestOutcome, KernelConfig, LifecycleEvent, MalformedDumpError, NewEncounter,
    NormalizedEncounter, RecordingObserver, RegistrationOutcome, StoreError, UploadMetadata,
};
use serde_json::{json, Value};

const SAMPLE: &str = include_str!("fixtures/sample_dump.json");
const SAMPLE_RECORDS: usize = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn sample_with_start(start: i64) -> Value {
    let mut value: Value = serde_json::from_str(SAMPLE).unwrap();
    value["Category"]["encounter"]["start"] = json!(start);
    value
}

fn meta(area_id: u32, filename: &str) -> UploadMetadata {
    UploadMetadata {
        area_id,
        filename: filename.to_string(),
        uploaded_at: 1_500_001_000,
        uploaded_by: None,
    }
}

fn ingestor() -> EncounterIngestor<InMemoryEncounterStore> {
    EncounterIngestor::new(Arc::new(InMemoryEncounterStore::new()), &KernelConfig::default())
}

fn new_encounter(url_id: &str, start: i64) -> NewEncounter {
    let normalized = DumpNormalizer::default()
        .normalize_value(sample_with_start(start))
        .unwrap();
    let identity =
        IdentityResolver::default().resolve(normalized.account_ids(), normalized.instance.started_at());
    NewEncounter {
        id: EncounterId::random(),
        url_id: url_id.to_string(),
        area_id: 1,
        instance: normalized.instance,
        filename: format!("{url_id}.evtc"),
        uploaded_at: start + 600,
        uploaded_by: None,
        identity,
    }
}

/// Delegates to a shared in-memory store, but answers the first
/// `stale_lookups` identity lookups with `None`, as a writer would that looked
/// before another upload's insert landed.
struct StaleLookupStore {
    inner: Arc<InMemoryEncounterStore>,
    stale_lookups: AtomicUsize,
    races: AtomicUsize,
}

impl StaleLookupStore {
    fn new(inner: Arc<InMemoryEncounterStore>, stale_lookups: usize) -> Self {
        Self {
            inner,
            stale_lookups: AtomicUsize::new(stale_lookups),
            races: AtomicUsize::new(0),
        }
    }

    fn races(&self) -> usize {
        self.races.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EncounterStore for StaleLookupStore {
    async fn insert_encounter(&self, encounter: NewEncounter) -> Result<EncounterRecord, StoreError> {
        let result = self.inner.insert_encounter(encounter).await;
        if matches!(result, Err(StoreError::IdentityRace(_))) {
            self.races.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn find_by_identity(
        &self,
        area_id: u32,
        identity: &EncounterIdentity,
    ) -> Result<Option<EncounterRecord>, StoreError> {
        let stale = self
            .stale_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stale {
            return Ok(None);
        }
        self.inner.find_by_identity(area_id, identity).await
    }

    async fn get(&self, id: EncounterId) -> Result<Option<EncounterRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn commit_attributes(&self, id: EncounterId, attributes: AttributeSet) -> Result<(), StoreError> {
        self.inner.commit_attributes(id, attributes).await
    }

    async fn replace_normalized(
        &self,
        id: EncounterId,
        normalized: NormalizedEncounter,
    ) -> Result<(), StoreError> {
        self.inner.replace_normalized(id, normalized).await
    }

    async fn query_attributes(
        &self,
        id: EncounterId,
        filter: &AttributeFilter,
    ) -> Result<AttributeSet, StoreError> {
        self.inner.query_attributes(id, filter).await
    }

    async fn delete(&self, id: EncounterId) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Duplicate Detection Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_uploads_within_guard_merge() {
    let ingestor = ingestor();

    let first = ingestor
        .ingest_value(sample_with_start(1_500_000_000), meta(1, "a.evtc"))
        .await
        .unwrap();
    // 29 seconds later still rounds to the same full guard.
    let second = ingestor
        .ingest_value(sample_with_start(1_500_000_029), meta(1, "b.evtc"))
        .await
        .unwrap();

    assert!(matches!(first, IngestOutcome::Created { .. }));
    assert!(matches!(second, IngestOutcome::Merged { .. }));
    assert_eq!(first.encounter_id(), second.encounter_id());
    assert_eq!(ingestor.store().num_encounters(), 1);
    assert_eq!(ingestor.store().num_attributes(), SAMPLE_RECORDS);
}

#[tokio::test]
async fn test_uploads_outside_guard_stay_separate() {
    let ingestor = ingestor();

    let first = ingestor
        .ingest_value(sample_with_start(1_500_000_000), meta(1, "a.evtc"))
        .await
        .unwrap();
    let later = ingestor
        .ingest_value(sample_with_start(1_500_000_100), meta(1, "b.evtc"))
        .await
        .unwrap();
    let other_area = ingestor
        .ingest_value(sample_with_start(1_500_000_000), meta(2, "c.evtc"))
        .await
        .unwrap();

    assert!(matches!(later, IngestOutcome::Created { .. }));
    assert!(matches!(other_area, IngestOutcome::Created { .. }));
    assert_ne!(first.encounter_id(), later.encounter_id());
    assert_eq!(ingestor.store().num_encounters(), 3);
}

#[tokio::test]
async fn test_different_roster_stays_separate() {
    let ingestor = ingestor();
    let mut value = sample_with_start(1_500_000_000);
    value["Category"]["status"]["Player"]["Beta"]["account"] = json!("gamma.0001");

    ingestor
        .ingest_value(sample_with_start(1_500_000_000), meta(1, "a.evtc"))
        .await
        .unwrap();
    let outcome = ingestor.ingest_value(value, meta(1, "b.evtc")).await.unwrap();

    assert!(matches!(outcome, IngestOutcome::Created { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_uploads_resolve_to_one_encounter() {
    let ingestor = Arc::new(ingestor());
    let dump = Arc::new(Dump::from_json_str(SAMPLE).unwrap());

    let mut handles = Vec::new();
    for i in 0..16 {
        let ingestor = Arc::clone(&ingestor);
        let dump = Arc::clone(&dump);
        handles.push(tokio::spawn(async move {
            ingestor.ingest(&dump, meta(1, &format!("upload_{i}.evtc"))).await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    let created = outcomes
        .iter()
        .filter(|o| matches!(o, IngestOutcome::Created { .. }))
        .count();
    assert_eq!(created, 1);
    assert!(outcomes
        .iter()
        .all(|o| o.encounter_id() == outcomes[0].encounter_id()));
    assert_eq!(ingestor.store().num_encounters(), 1);
    assert_eq!(ingestor.store().num_attributes(), SAMPLE_RECORDS);
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration Race Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_after_lost_race_returns_winner() {
    let inner = Arc::new(InMemoryEncounterStore::new());
    let winner = inner
        .insert_encounter(new_encounter("Winner", 1_500_000_000))
        .await
        .unwrap();
    let store = StaleLookupStore::new(Arc::clone(&inner), 1);

    // 10 seconds later: same full guard, so the insert collides.
    let outcome = store
        .register(new_encounter("Loser", 1_500_000_010))
        .await
        .unwrap();

    assert_eq!(outcome, RegistrationOutcome::Merged(winner));
    assert_eq!(store.races(), 1);
    assert_eq!(inner.num_encounters(), 1);
}

#[tokio::test]
async fn test_upload_losing_race_commits_records_once() {
    let inner = Arc::new(InMemoryEncounterStore::new());
    // The winner registered but has not committed its records yet.
    let winner = inner
        .insert_encounter(new_encounter("Winner", 1_500_000_000))
        .await
        .unwrap();

    let store = Arc::new(StaleLookupStore::new(Arc::clone(&inner), 1));
    let late = EncounterIngestor::new(Arc::clone(&store), &KernelConfig::default());
    let outcome = late
        .ingest_value(sample_with_start(1_500_000_000), meta(1, "late.evtc"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        IngestOutcome::Merged {
            id: winner.id,
            url_id: winner.url_id.clone(),
        }
    );
    assert_eq!(store.races(), 1);
    assert_eq!(inner.num_encounters(), 1);
    assert_eq!(inner.num_attributes(), SAMPLE_RECORDS);

    // A second late upload finds the records already committed.
    let again = late
        .ingest_value(sample_with_start(1_500_000_020), meta(1, "later.evtc"))
        .await
        .unwrap();
    assert_eq!(again.encounter_id(), winner.id);
    assert_eq!(inner.num_attributes(), SAMPLE_RECORDS);
}

// ─────────────────────────────────────────────────────────────────────────────
// Cascade Delete Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_removes_exactly_one_encounters_records() {
    let observer = Arc::new(RecordingObserver::new());
    let store = Arc::new(InMemoryEncounterStore::new().with_observer(observer.clone()));
    let ingestor = EncounterIngestor::new(Arc::clone(&store), &KernelConfig::default());

    let doomed = ingestor
        .ingest_value(sample_with_start(1_500_000_000), meta(1, "doomed.evtc"))
        .await
        .unwrap();
    let kept = ingestor
        .ingest_value(sample_with_start(1_600_000_000), meta(1, "kept.evtc"))
        .await
        .unwrap();
    assert_eq!(store.num_attributes(), 2 * SAMPLE_RECORDS);

    assert!(store.delete(doomed.encounter_id()).await.unwrap());

    assert_eq!(store.num_attributes(), SAMPLE_RECORDS);
    let remaining = store
        .query_attributes(kept.encounter_id(), &AttributeFilter::new())
        .await
        .unwrap();
    assert_eq!(remaining.len(), SAMPLE_RECORDS);
    assert!(store.get(doomed.encounter_id()).await.unwrap().is_none());

    let events = observer.events();
    assert_eq!(events.len(), 3);
    assert_eq!(
        events[2],
        LifecycleEvent::Destroyed {
            id: doomed.encounter_id(),
            url_id: doomed.url_id().to_string(),
            filename: "doomed.evtc".to_string(),
        }
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Rejection Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_success_is_rejected_and_persists_nothing() {
    let ingestor = ingestor();
    let mut value = sample_with_start(1_500_000_000);
    value["Category"]["encounter"]
        .as_object_mut()
        .unwrap()
        .remove("success");

    let err = ingestor.ingest_value(value, meta(1, "bad.evtc")).await.unwrap_err();

    assert!(matches!(err, IngestError::Rejected(_)));
    assert!(err.to_string().contains("success"));
    assert_eq!(ingestor.store().num_encounters(), 0);
    assert_eq!(ingestor.store().num_attributes(), 0);
}

#[tokio::test]
async fn test_missing_events_is_rejected_and_persists_nothing() {
    let ingestor = ingestor();
    let mut value = sample_with_start(1_500_000_000);
    value["Category"]["combat"]["Phase"]["Phase2"]["Player"]["Beta"]["Metrics"]
        .as_object_mut()
        .unwrap()
        .remove("events");

    let err = ingestor.ingest_value(value, meta(1, "bad.evtc")).await.unwrap_err();

    assert!(matches!(
        err,
        IngestError::Rejected(MalformedDumpError::MissingKey { key: "events", .. })
    ));
    assert_eq!(ingestor.store().num_encounters(), 0);
}

#[tokio::test]
async fn test_rejected_upload_does_not_disturb_existing_encounter() {
    let ingestor = ingestor();
    let good = ingestor
        .ingest_value(sample_with_start(1_500_000_000), meta(1, "good.evtc"))
        .await
        .unwrap();

    let mut bad = sample_with_start(1_500_000_000);
    bad["Category"]["combat"]["Phase"]["Phase1"]["Player"]["Alpha"]
        .as_object_mut()
        .unwrap()
        .remove("Metrics");
    assert!(ingestor.ingest_value(bad, meta(1, "bad.evtc")).await.is_err());

    let records = ingestor
        .store()
        .query_attributes(good.encounter_id(), &AttributeFilter::new())
        .await
        .unwrap();
    assert_eq!(records.len(), SAMPLE_RECORDS);
}
