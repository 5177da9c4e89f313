//! Dump normalizer.
//!
//! Walks one [`Dump`] and produces an [`EncounterInstance`] together with its
//! [`AttributeSet`]. Normalization is synchronous and allocation-only: records
//! are buffered in the set and handed to a store as one batch, so a failure
//! part-way leaves nothing behind.
//!
//! ## Algorithm
//!
//! 1. Build the instance from the category section
//! 2. One phase record per phase, one player record per roster entry
//! 3. For every non-aggregate phase and every player in it:
//!    - buffs received and dealt (zero values skipped)
//!    - incoming per-skill damage
//!    - outgoing damage: per-skill rows for the aggregate target when a
//!      breakdown exists, otherwise positive "condi"/"power" summary rows
//!    - one event record
//!    - one negated shielded-damage record
//!    - mechanics, when present
//! 4. If no mechanic record was emitted, take mechanics from the aggregate
//!    phase instead

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, debug_span, info};

use crate::store::AttributeSet;
use crate::types::dump::{CombatPlayer, PlayerMetrics, RawRates, SkillStats};
use crate::types::{
    AttributeKind, BuffAttribute, DamageAttribute, DamageRates, DuplicateAttributeError, Dump,
    EncounterInstance, EventAttribute, MalformedDumpError, MechanicAttribute, PhaseAttribute,
    PlayerAttribute, AGGREGATE_ACTOR, AGGREGATE_PHASE, CONDI_SKILL, POWER_SKILL,
    RAW_VALUE_BUFFS, SHIELDED_SKILL,
};

/// Error type for normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// Required dump data is missing.
    #[error(transparent)]
    Malformed(#[from] MalformedDumpError),
    /// The dump produced two records with the same key.
    #[error("corrupt dump: {0}")]
    Duplicate(#[from] DuplicateAttributeError),
}

/// Names the normalizer treats specially.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Phase spanning the whole fight; skipped by the main pass.
    pub aggregate_phase: String,
    /// Actor standing for "everyone".
    pub aggregate_actor: String,
    /// Buffs stored as raw values rather than uptime fractions.
    pub raw_value_buffs: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            aggregate_phase: AGGREGATE_PHASE.to_string(),
            aggregate_actor: AGGREGATE_ACTOR.to_string(),
            raw_value_buffs: RAW_VALUE_BUFFS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// An instance and its buffered records, ready to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEncounter {
    /// The encounter instance.
    pub instance: EncounterInstance,
    /// Every record normalized from the dump.
    pub attributes: AttributeSet,
}

impl NormalizedEncounter {
    /// Account identifiers of the roster, ordered.
    pub fn account_ids(&self) -> Vec<&str> {
        self.attributes.players().map(|p| p.account_id.as_str()).collect()
    }
}

/// Deterministic dump normalizer.
#[derive(Debug, Clone, Default)]
pub struct DumpNormalizer {
    config: NormalizerConfig,
}

impl DumpNormalizer {
    /// Create a normalizer.
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Interpret a JSON tree as a dump and normalize it.
    pub fn normalize_value(&self, value: Value) -> Result<NormalizedEncounter, NormalizeError> {
        let dump = Dump::from_value(value)?;
        self.normalize(&dump)
    }

    /// Normalize a dump.
    pub fn normalize(&self, dump: &Dump) -> Result<NormalizedEncounter, NormalizeError> {
        let category = &dump.category;
        let instance = EncounterInstance::from_category(category)?;

        let span = debug_span!("normalize", boss = %instance.boss, start_tick = instance.start_tick);
        let _enter = span.enter();

        let mut set = AttributeSet::new();

        for (name, boundary) in &category.encounter.phases {
            set.insert(PhaseAttribute {
                name: name.clone(),
                start_tick: boundary.start_tick,
            })?;
        }

        for (character, status) in &category.status.players {
            set.insert(PlayerAttribute {
                account_id: status.account.clone(),
                character: character.clone(),
                party: status.party,
                profession: status.profession,
                elite: status.elite,
                archetype: status.archetype,
                conc: status.concentration,
                condi: status.condition,
                heal: status.healing,
                tough: status.toughness,
                death_tick: None,
            })?;
        }

        for (phase, combat) in &category.combat.phases {
            if *phase == self.config.aggregate_phase {
                continue;
            }
            for (player, entry) in &combat.players {
                let metrics = entry.metrics.as_ref().ok_or_else(|| MalformedDumpError::MissingKey {
                    path: format!("combat.Phase.{}.Player.{}", phase, player),
                    key: "Metrics",
                })?;
                self.emit_player_phase(&mut set, phase, player, metrics)?;
            }
        }

        if set.count(AttributeKind::Mechanic) == 0 {
            if let Some(aggregate) = category.combat.phases.get(&self.config.aggregate_phase) {
                let emitted = self.emit_aggregate_mechanics(&mut set, &aggregate.players)?;
                if emitted > 0 {
                    debug!(emitted, "mechanics taken from aggregate phase");
                }
            }
        }

        let counts = set.counts();
        info!(
            boss = %instance.boss,
            phases = counts.phases,
            players = counts.players,
            damage = counts.damage,
            buffs = counts.buffs,
            events = counts.events,
            mechanics = counts.mechanics,
            "dump normalized"
        );

        Ok(NormalizedEncounter {
            instance,
            attributes: set,
        })
    }

    fn emit_player_phase(
        &self,
        set: &mut AttributeSet,
        phase: &str,
        player: &str,
        metrics: &PlayerMetrics,
    ) -> Result<(), NormalizeError> {
        let path = || format!("combat.Phase.{}.Player.{}.Metrics", phase, player);

        // Buffs received, then buffs dealt.
        for (source, buffs) in &metrics.buffs.from {
            self.emit_buffs(set, phase, source, player, buffs)?;
        }
        for (target, buffs) in &metrics.buffs.to {
            self.emit_buffs(set, phase, player, target, buffs)?;
        }

        // Incoming damage is only recorded when broken down by skill.
        for (source, stats) in &metrics.damage.from {
            if let Some(skills) = &stats.skills {
                emit_skills(set, phase, source, player, skills)?;
            }
        }

        for (target, stats) in &metrics.damage.to {
            match &stats.skills {
                Some(skills) if *target == self.config.aggregate_actor => {
                    emit_skills(set, phase, player, target, skills)?;
                }
                _ => {
                    let required = |total: Option<i64>, key: &'static str| {
                        total.ok_or_else(|| MalformedDumpError::MissingKey {
                            path: format!("{}.damage.To.{}", path(), target),
                            key,
                        })
                    };
                    let condi = required(stats.condi, "condi")?;
                    let power = required(stats.power, "power")?;

                    let rates = to_fractions(&stats.rates);
                    for (skill, total) in [(CONDI_SKILL, condi), (POWER_SKILL, power)] {
                        if total > 0 {
                            set.insert(DamageAttribute {
                                phase: phase.to_string(),
                                source: player.to_string(),
                                target: target.clone(),
                                skill: skill.to_string(),
                                damage: total,
                                rates,
                            })?;
                        }
                    }
                }
            }
        }

        let events = metrics.events.as_ref().ok_or_else(|| MalformedDumpError::MissingKey {
            path: path(),
            key: "events",
        })?;
        set.insert(EventAttribute {
            phase: phase.to_string(),
            source: player.to_string(),
            disconnect_count: events.disconnects,
            disconnect_time: ticks(events.disconnect_time),
            down_count: events.downs,
            down_time: ticks(events.down_time),
            dead_count: 0,
            dead_time: 0,
        })?;

        let shield = metrics
            .shielded
            .as_ref()
            .and_then(|s| s.from.get(&self.config.aggregate_actor))
            .ok_or_else(|| MalformedDumpError::MissingKey {
                path: path(),
                key: "shielded.From",
            })?;
        set.insert(DamageAttribute {
            phase: phase.to_string(),
            source: self.config.aggregate_actor.clone(),
            target: player.to_string(),
            skill: SHIELDED_SKILL.to_string(),
            damage: -shield.total,
            rates: to_fractions(&shield.rates),
        })?;

        if let Some(mechanics) = &metrics.mechanics {
            emit_mechanics(set, phase, player, mechanics)?;
        }

        Ok(())
    }

    fn emit_buffs(
        &self,
        set: &mut AttributeSet,
        phase: &str,
        source: &str,
        target: &str,
        buffs: &BTreeMap<String, f64>,
    ) -> Result<(), NormalizeError> {
        for (name, &value) in buffs {
            if value <= 0.0 {
                continue;
            }
            let uptime = if self.config.raw_value_buffs.iter().any(|b| b == name) {
                value
            } else {
                value / 100.0
            };
            set.insert(BuffAttribute {
                phase: phase.to_string(),
                source: source.to_string(),
                target: target.to_string(),
                name: name.clone(),
                uptime,
            })?;
        }
        Ok(())
    }

    fn emit_aggregate_mechanics(
        &self,
        set: &mut AttributeSet,
        players: &BTreeMap<String, CombatPlayer>,
    ) -> Result<usize, NormalizeError> {
        let before = set.count(AttributeKind::Mechanic);
        for (player, entry) in players {
            if let Some(mechanics) = entry.mechanics() {
                emit_mechanics(set, &self.config.aggregate_phase, player, mechanics)?;
            }
        }
        Ok(set.count(AttributeKind::Mechanic) - before)
    }
}

fn emit_skills(
    set: &mut AttributeSet,
    phase: &str,
    source: &str,
    target: &str,
    skills: &BTreeMap<String, SkillStats>,
) -> Result<(), DuplicateAttributeError> {
    for (skill, stats) in skills {
        set.insert(DamageAttribute {
            phase: phase.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            skill: skill.clone(),
            damage: stats.total,
            rates: to_fractions(&stats.rates),
        })?;
    }
    Ok(())
}

fn emit_mechanics(
    set: &mut AttributeSet,
    phase: &str,
    source: &str,
    mechanics: &BTreeMap<String, u32>,
) -> Result<(), DuplicateAttributeError> {
    for (name, &count) in mechanics {
        set.insert(MechanicAttribute {
            phase: phase.to_string(),
            source: source.to_string(),
            name: name.clone(),
            count,
        })?;
    }
    Ok(())
}

/// Percent rates to fractions; absent rates become zero.
fn to_fractions(raw: &RawRates) -> DamageRates {
    let fraction = |v: Option<f64>| v.map(|p| p / 100.0).unwrap_or(0.0);
    DamageRates {
        crit: fraction(raw.crit),
        fifty: fraction(raw.fifty),
        flanking: fraction(raw.flanking),
        scholar: fraction(raw.scholar),
        seaweed: fraction(raw.seaweed),
    }
}

/// Fractional tick counts are truncated.
fn ticks(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.trunc() as u64
    } else {
        0
    }
}
