//! In-memory encounter store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::identity::EncounterIdentity;
use crate::normalizer::NormalizedEncounter;
use crate::types::EncounterId;
use super::{
    AttributeFilter, AttributeSet, EncounterRecord, EncounterStore, IdentityRaceError,
    LifecycleEvent, LifecycleObserver, NewEncounter, StoreError,
};

/// Uniqueness key for one guard column: (area, fingerprint, rounded start).
type GuardIndexKey = (u32, String, i64);

#[derive(Debug)]
struct Entry {
    record: EncounterRecord,
    /// `None` until the first commit.
    attributes: Option<AttributeSet>,
}

#[derive(Debug, Default)]
struct Inner {
    encounters: BTreeMap<EncounterId, Entry>,
    by_full: HashMap<GuardIndexKey, EncounterId>,
    by_half: HashMap<GuardIndexKey, EncounterId>,
    by_url: HashMap<String, EncounterId>,
}

impl Inner {
    fn full_key(area_id: u32, identity: &EncounterIdentity) -> GuardIndexKey {
        (area_id, identity.fingerprint.clone(), identity.guards.full)
    }

    fn half_key(area_id: u32, identity: &EncounterIdentity) -> GuardIndexKey {
        (area_id, identity.fingerprint.clone(), identity.guards.half)
    }

    fn holder(&self, area_id: u32, identity: &EncounterIdentity) -> Option<EncounterId> {
        self.by_full
            .get(&Self::full_key(area_id, identity))
            .or_else(|| self.by_half.get(&Self::half_key(area_id, identity)))
            .copied()
    }

    fn entry_mut(&mut self, id: EncounterId) -> Result<&mut Entry, StoreError> {
        self.encounters.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

/// In-memory encounter store.
///
/// Uses BTreeMap for deterministic iteration order. Attributes live inside
/// their encounter's entry, so deleting the encounter drops them with it.
#[derive(Default)]
pub struct InMemoryEncounterStore {
    inner: RwLock<Inner>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl std::fmt::Debug for InMemoryEncounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEncounterStore")
            .field("encounters", &self.num_encounters())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl InMemoryEncounterStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lifecycle observer.
    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Get number of encounters.
    pub fn num_encounters(&self) -> usize {
        self.inner.read().encounters.len()
    }

    /// Get number of attribute records across all encounters.
    pub fn num_attributes(&self) -> usize {
        self.inner
            .read()
            .encounters
            .values()
            .filter_map(|e| e.attributes.as_ref())
            .map(AttributeSet::len)
            .sum()
    }

    /// All registered encounters, ordered by id.
    pub fn all_encounters(&self) -> Vec<EncounterRecord> {
        self.inner
            .read()
            .encounters
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    fn notify(&self, event: LifecycleEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

#[async_trait]
impl EncounterStore for InMemoryEncounterStore {
    async fn insert_encounter(&self, encounter: NewEncounter) -> Result<EncounterRecord, StoreError> {
        let record = {
            let mut inner = self.inner.write();

            if let Some(existing) = inner.holder(encounter.area_id, &encounter.identity) {
                return Err(IdentityRaceError { existing }.into());
            }
            if inner.by_url.contains_key(&encounter.url_id) {
                return Err(StoreError::UrlIdConflict(encounter.url_id));
            }

            let full = Inner::full_key(encounter.area_id, &encounter.identity);
            let half = Inner::half_key(encounter.area_id, &encounter.identity);
            let record = EncounterRecord::from(encounter);

            inner.by_full.insert(full, record.id);
            inner.by_half.insert(half, record.id);
            inner.by_url.insert(record.url_id.clone(), record.id);
            inner.encounters.insert(
                record.id,
                Entry {
                    record: record.clone(),
                    attributes: None,
                },
            );
            record
        };

        self.notify(LifecycleEvent::Created {
            id: record.id,
            url_id: record.url_id.clone(),
        });
        Ok(record)
    }

    async fn find_by_identity(
        &self,
        area_id: u32,
        identity: &EncounterIdentity,
    ) -> Result<Option<EncounterRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .holder(area_id, identity)
            .and_then(|id| inner.encounters.get(&id))
            .map(|e| e.record.clone()))
    }

    async fn get(&self, id: EncounterId) -> Result<Option<EncounterRecord>, StoreError> {
        Ok(self.inner.read().encounters.get(&id).map(|e| e.record.clone()))
    }

    async fn commit_attributes(&self, id: EncounterId, attributes: AttributeSet) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        if entry.attributes.is_some() {
            return Err(StoreError::AlreadyNormalized(id));
        }
        entry.attributes = Some(attributes);
        Ok(())
    }

    async fn replace_normalized(
        &self,
        id: EncounterId,
        normalized: NormalizedEncounter,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        entry.record.duration = normalized.instance.duration();
        entry.record.success = normalized.instance.success;
        entry.record.instance = normalized.instance;
        entry.attributes = Some(normalized.attributes);
        Ok(())
    }

    async fn query_attributes(
        &self,
        id: EncounterId,
        filter: &AttributeFilter,
    ) -> Result<AttributeSet, StoreError> {
        let inner = self.inner.read();
        let entry = inner.encounters.get(&id).ok_or(StoreError::NotFound(id))?;

        let mut result = AttributeSet::new();
        if let Some(attributes) = &entry.attributes {
            for attribute in attributes.query(filter) {
                result.insert(attribute.clone())?;
            }
        }
        Ok(result)
    }

    async fn delete(&self, id: EncounterId) -> Result<bool, StoreError> {
        let removed = {
            let mut inner = self.inner.write();
            let Some(entry) = inner.encounters.remove(&id) else {
                return Ok(false);
            };
            let record = &entry.record;
            inner.by_full.retain(|_, holder| *holder != id);
            inner.by_half.retain(|_, holder| *holder != id);
            inner.by_url.remove(&record.url_id);
            entry.record
        };

        self.notify(LifecycleEvent::Destroyed {
            id,
            url_id: removed.url_id,
            filename: removed.filename,
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityResolver;
    use crate::store::{RecordingObserver, RegistrationOutcome};
    use crate::types::{EncounterInstance, PhaseAttribute};
    use chrono::{TimeZone, Utc};

    fn new_encounter(url_id: &str, started_at: i64, accounts: &[&str]) -> NewEncounter {
        let instance = EncounterInstance {
            boss: "Vale Guardian".to_string(),
            cm: false,
            start_timestamp: Utc.timestamp_opt(started_at, 0).unwrap(),
            start_tick: 1000,
            end_tick: 61000,
            success: true,
            evtc_version: "EVTC20200101".to_string(),
        };
        NewEncounter {
            id: EncounterId::random(),
            url_id: url_id.to_string(),
            area_id: 1,
            identity: IdentityResolver::default().resolve(accounts, started_at),
            instance,
            filename: format!("{url_id}.evtc"),
            uploaded_at: started_at + 600,
            uploaded_by: None,
        }
    }

    fn phases(names: &[&str]) -> AttributeSet {
        let mut set = AttributeSet::new();
        for (i, name) in names.iter().enumerate() {
            set.insert(PhaseAttribute {
                name: name.to_string(),
                start_tick: i as u64 * 1000,
            })
            .unwrap();
        }
        set
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryEncounterStore::new();
        let record = store
            .insert_encounter(new_encounter("AmberFalcon", 1000, &["a.1234", "b.5678"]))
            .await
            .unwrap();

        assert_eq!(record.started_at, 1000);
        assert_eq!(record.duration, 600.0);
        assert_eq!(record.guards.full, 1020);

        let fetched = store.get(record.id).await.unwrap();
        assert_eq!(fetched, Some(record));
    }

    #[tokio::test]
    async fn test_guard_collision_is_a_race() {
        let store = InMemoryEncounterStore::new();
        let first = store
            .insert_encounter(new_encounter("First", 1000, &["a.1234", "b.5678"]))
            .await
            .unwrap();

        // 1029 shares the full guard with 1000.
        let err = store
            .insert_encounter(new_encounter("Second", 1029, &["b.5678", "a.1234"]))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::IdentityRace(IdentityRaceError { existing: first.id }));

        // Different roster, same start: no collision.
        store
            .insert_encounter(new_encounter("Third", 1000, &["c.0001"]))
            .await
            .unwrap();
        assert_eq!(store.num_encounters(), 2);
    }

    #[tokio::test]
    async fn test_register_merges() {
        let store = InMemoryEncounterStore::new();
        let created = store
            .register(new_encounter("First", 1000, &["a.1234"]))
            .await
            .unwrap();
        assert!(created.is_created());

        let merged = store
            .register(new_encounter("Second", 1029, &["a.1234"]))
            .await
            .unwrap();
        assert_eq!(merged, RegistrationOutcome::Merged(created.record().clone()));

        let separate = store
            .register(new_encounter("Third", 1100, &["a.1234"]))
            .await
            .unwrap();
        assert!(separate.is_created());
    }

    #[tokio::test]
    async fn test_url_id_conflict() {
        let store = InMemoryEncounterStore::new();
        store
            .insert_encounter(new_encounter("Same", 1000, &["a.1234"]))
            .await
            .unwrap();
        let err = store
            .insert_encounter(new_encounter("Same", 5000, &["a.1234"]))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UrlIdConflict("Same".to_string()));
    }

    #[tokio::test]
    async fn test_commit_once_then_replace() {
        let store = InMemoryEncounterStore::new();
        let record = store
            .insert_encounter(new_encounter("First", 1000, &["a.1234"]))
            .await
            .unwrap();

        store.commit_attributes(record.id, phases(&["All", "Phase1"])).await.unwrap();
        assert_eq!(
            store.commit_attributes(record.id, phases(&["All"])).await,
            Err(StoreError::AlreadyNormalized(record.id))
        );

        let mut instance = record.instance.clone();
        instance.end_tick = 91000;
        instance.success = false;
        store
            .replace_normalized(
                record.id,
                NormalizedEncounter {
                    instance: instance.clone(),
                    attributes: phases(&["All"]),
                },
            )
            .await
            .unwrap();

        let all = store.query_attributes(record.id, &AttributeFilter::new()).await.unwrap();
        assert_eq!(all.len(), 1);
        let replaced = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(replaced.instance, instance);
        assert_eq!(replaced.duration, 900.0);
        assert!(!replaced.success);
        assert_eq!(replaced.guards, record.guards);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = InMemoryEncounterStore::new();
        let record = store
            .insert_encounter(new_encounter("First", 1000, &["a.1234"]))
            .await
            .unwrap();
        store
            .commit_attributes(record.id, phases(&["All", "Phase1", "Phase2"]))
            .await
            .unwrap();

        let phase1 = store
            .query_attributes(record.id, &AttributeFilter::new().phase("Phase1"))
            .await
            .unwrap();
        assert_eq!(phase1.len(), 1);

        let missing = store
            .query_attributes(EncounterId::random(), &AttributeFilter::new())
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_frees_guards() {
        let observer = Arc::new(RecordingObserver::new());
        let store = InMemoryEncounterStore::new().with_observer(observer.clone());

        let doomed = store
            .insert_encounter(new_encounter("Doomed", 1000, &["a.1234"]))
            .await
            .unwrap();
        let kept = store
            .insert_encounter(new_encounter("Kept", 1000, &["b.5678"]))
            .await
            .unwrap();
        store.commit_attributes(doomed.id, phases(&["All", "Phase1"])).await.unwrap();
        store.commit_attributes(kept.id, phases(&["All"])).await.unwrap();

        assert!(store.delete(doomed.id).await.unwrap());
        assert!(!store.delete(doomed.id).await.unwrap());
        assert_eq!(store.num_attributes(), 1);

        // Guards are free again.
        store
            .insert_encounter(new_encounter("Again", 1000, &["a.1234"]))
            .await
            .unwrap();

        let events = observer.events();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[2],
            LifecycleEvent::Destroyed {
                id: doomed.id,
                url_id: "Doomed".to_string(),
                filename: "Doomed.evtc".to_string(),
            }
        );
    }
}
