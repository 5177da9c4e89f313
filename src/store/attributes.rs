//! In-memory attribute set for one encounter instance.
//!
//! Records are keyed by [`AttributeKey`] in a `BTreeMap`, so iteration is
//! deterministic and a second insert with the same key is detected rather
//! than overwriting the first.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::canonical::canonical_hash_hex;
use crate::types::{
    Attribute, AttributeKey, AttributeKind, BuffAttribute, DamageAttribute,
    DuplicateAttributeError, EventAttribute, MechanicAttribute, PhaseAttribute, PlayerAttribute,
};

/// Conjunctive filter over attribute records. Unset fields match anything.
///
/// A set field never matches a record that lacks the column (e.g. a target
/// filter excludes event records).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    /// Phase name.
    pub phase: Option<String>,
    /// Source actor.
    pub source: Option<String>,
    /// Target actor.
    pub target: Option<String>,
    /// Skill, buff, mechanic or phase name.
    pub name: Option<String>,
}

impl AttributeFilter {
    /// A filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a phase.
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Restrict to a source actor.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Restrict to a target actor.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Restrict to a skill/buff/mechanic name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the record passes every set restriction.
    pub fn matches(&self, attribute: &Attribute) -> bool {
        fn check(wanted: &Option<String>, actual: Option<&str>) -> bool {
            match wanted {
                Some(w) => actual == Some(w.as_str()),
                None => true,
            }
        }

        check(&self.phase, attribute.phase())
            && check(&self.source, attribute.source())
            && check(&self.target, attribute.target())
            && check(&self.name, attribute.name())
    }
}

/// Number of records per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeCounts {
    /// Phase records.
    pub phases: usize,
    /// Player records.
    pub players: usize,
    /// Damage records.
    pub damage: usize,
    /// Buff records.
    pub buffs: usize,
    /// Event records.
    pub events: usize,
    /// Mechanic records.
    pub mechanics: usize,
}

impl AttributeCounts {
    /// Sum over all kinds.
    pub fn total(&self) -> usize {
        self.phases + self.players + self.damage + self.buffs + self.events + self.mechanics
    }
}

/// Normalized records of one encounter instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    records: BTreeMap<AttributeKey, Attribute>,
}

impl AttributeSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, rejecting one whose key is already present.
    pub fn insert(&mut self, attribute: impl Into<Attribute>) -> Result<(), DuplicateAttributeError> {
        let attribute = attribute.into();
        let key = attribute.key();
        if self.records.contains_key(&key) {
            return Err(DuplicateAttributeError { key });
        }
        self.records.insert(key, attribute);
        Ok(())
    }

    /// Whether a record with this key exists.
    pub fn contains(&self, key: &AttributeKey) -> bool {
        self.records.contains_key(key)
    }

    /// Look up a record by key.
    pub fn get(&self, key: &AttributeKey) -> Option<&Attribute> {
        self.records.get(key)
    }

    /// Lazily iterate over matching records.
    ///
    /// The returned iterator is `Clone`, so a consumer can restart it.
    pub fn query(&self, filter: &AttributeFilter) -> impl Iterator<Item = &Attribute> + Clone + '_ {
        let filter = filter.clone();
        self.records.values().filter(move |a| filter.matches(a))
    }

    /// Matching damage records.
    pub fn damage(&self, filter: &AttributeFilter) -> impl Iterator<Item = &DamageAttribute> + Clone + '_ {
        self.query(filter).filter_map(|a| match a {
            Attribute::Damage(d) => Some(d),
            _ => None,
        })
    }

    /// Matching buff records.
    pub fn buffs(&self, filter: &AttributeFilter) -> impl Iterator<Item = &BuffAttribute> + Clone + '_ {
        self.query(filter).filter_map(|a| match a {
            Attribute::Buff(b) => Some(b),
            _ => None,
        })
    }

    /// Matching event records.
    pub fn events(&self, filter: &AttributeFilter) -> impl Iterator<Item = &EventAttribute> + Clone + '_ {
        self.query(filter).filter_map(|a| match a {
            Attribute::Event(e) => Some(e),
            _ => None,
        })
    }

    /// Matching mechanic records.
    pub fn mechanics(&self, filter: &AttributeFilter) -> impl Iterator<Item = &MechanicAttribute> + Clone + '_ {
        self.query(filter).filter_map(|a| match a {
            Attribute::Mechanic(m) => Some(m),
            _ => None,
        })
    }

    /// All player records, ordered by account id.
    pub fn players(&self) -> impl Iterator<Item = &PlayerAttribute> + Clone + '_ {
        self.records.values().filter_map(|a| match a {
            Attribute::Player(p) => Some(p),
            _ => None,
        })
    }

    /// All phase records, ordered by name.
    pub fn phases(&self) -> impl Iterator<Item = &PhaseAttribute> + Clone + '_ {
        self.records.values().filter_map(|a| match a {
            Attribute::Phase(p) => Some(p),
            _ => None,
        })
    }

    /// All records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Attribute> + Clone + '_ {
        self.records.values()
    }

    /// Number of records of one kind.
    pub fn count(&self, kind: AttributeKind) -> usize {
        self.records.keys().filter(|k| k.kind() == kind).count()
    }

    /// Number of records per kind.
    pub fn counts(&self) -> AttributeCounts {
        let mut counts = AttributeCounts::default();
        for key in self.records.keys() {
            match key.kind() {
                AttributeKind::Phase => counts.phases += 1,
                AttributeKind::Player => counts.players += 1,
                AttributeKind::Damage => counts.damage += 1,
                AttributeKind::Buff => counts.buffs += 1,
                AttributeKind::Event => counts.events += 1,
                AttributeKind::Mechanic => counts.mechanics += 1,
            }
        }
        counts
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Content digest over every record in key order.
    ///
    /// Two sets normalized from the same dump share a digest.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let records: Vec<&Attribute> = self.records.values().collect();
        canonical_hash_hex(&records)
    }

    /// Consume the set, yielding records in key order.
    pub fn into_records(self) -> impl Iterator<Item = Attribute> {
        self.records.into_values()
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = &'a Attribute;
    type IntoIter = std::collections::btree_map::Values<'a, AttributeKey, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.values()
    }
}
