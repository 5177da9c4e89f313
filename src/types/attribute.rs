//! Normalized attribute records.
//!
//! Every record belongs to exactly one encounter instance. Each kind has its
//! own uniqueness key, derived by [`Attribute::key`]; two records with the
//! same key can never coexist for one instance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Actor name standing for "every actor" in source/target columns.
pub const AGGREGATE_ACTOR: &str = "*All";

/// Name of the aggregate phase spanning the whole fight.
pub const AGGREGATE_PHASE: &str = "All";

/// Synthetic skill carrying (negated) shielded damage.
pub const SHIELDED_SKILL: &str = "shielded";

/// Synthetic skill carrying summary condition damage.
pub const CONDI_SKILL: &str = "condi";

/// Synthetic skill carrying summary power damage.
pub const POWER_SKILL: &str = "power";

/// Buffs whose value is a stack count or intensity rather than an uptime.
pub const RAW_VALUE_BUFFS: [&str; 2] = ["might", "stability"];

/// Skills counted as condition damage when no "condi" row exists.
pub const CONDITION_SKILLS: [&str; 5] = ["Bleeding", "Burning", "Confusion", "Poisoned", "Torment"];

/// Kind discriminant of an [`Attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Named phase of the fight.
    Phase,
    /// Participant snapshot.
    Player,
    /// Damage between two actors for one skill.
    Damage,
    /// Buff uptime between two actors.
    Buff,
    /// Disconnect/down/death counters of one actor.
    Event,
    /// Mechanic trigger count of one actor.
    Mechanic,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase => write!(f, "phase"),
            Self::Player => write!(f, "player"),
            Self::Damage => write!(f, "damage"),
            Self::Buff => write!(f, "buff"),
            Self::Event => write!(f, "event"),
            Self::Mechanic => write!(f, "mechanic"),
        }
    }
}

/// Named time segment of an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseAttribute {
    /// Phase name, e.g. "Phase1".
    pub name: String,
    /// Tick at which the phase begins.
    pub start_tick: u64,
}

/// Participant snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAttribute {
    /// External account identifier.
    #[serde(rename = "account")]
    pub account_id: String,
    /// In-game character name.
    #[serde(rename = "name")]
    pub character: String,
    /// Party / squad subgroup.
    pub party: u32,
    /// Profession code.
    pub profession: u32,
    /// Elite specialization code.
    pub elite: u32,
    /// Archetype code.
    pub archetype: u32,
    /// Concentration stat.
    #[serde(rename = "concentration")]
    pub conc: u32,
    /// Condition damage stat.
    #[serde(rename = "condition")]
    pub condi: u32,
    /// Healing power stat.
    #[serde(rename = "healing")]
    pub heal: u32,
    /// Toughness stat.
    #[serde(rename = "toughness")]
    pub tough: u32,
    /// Tick of death. Reserved; the current dump format does not supply it.
    #[serde(rename = "Death")]
    pub death_tick: Option<u64>,
}

/// Rate fields of a damage row, each a 0–1 fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DamageRates {
    /// Critical hit rate.
    pub crit: f64,
    /// Rate of hits on targets under 50% health.
    pub fifty: f64,
    /// Flanking rate.
    pub flanking: f64,
    /// Scholar rune uptime.
    pub scholar: f64,
    /// Seaweed salad uptime.
    pub seaweed: f64,
}

/// Damage between two actors for one skill in one phase.
///
/// Negative totals are absorbed damage (see [`SHIELDED_SKILL`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageAttribute {
    /// Phase name.
    pub phase: String,
    /// Source actor.
    pub source: String,
    /// Target actor.
    pub target: String,
    /// Skill name.
    pub skill: String,
    /// Signed damage total.
    pub damage: i64,
    /// Rate fields.
    #[serde(flatten)]
    pub rates: DamageRates,
}

/// Percent-valued view of a damage row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageReport {
    /// Skill name.
    pub skill: String,
    /// Damage total.
    pub total: i64,
    /// Critical hit rate, percent.
    pub crit: f64,
    /// Under-50% hit rate, percent.
    pub fifty: f64,
    /// Flanking rate, percent.
    pub flanking: f64,
    /// Scholar uptime, percent.
    pub scholar: f64,
    /// Seaweed uptime, percent.
    pub seaweed: f64,
}

impl DamageAttribute {
    /// Percent-valued view for reporting.
    pub fn report(&self) -> DamageReport {
        DamageReport {
            skill: self.skill.clone(),
            total: self.damage,
            crit: self.rates.crit * 100.0,
            fifty: self.rates.fifty * 100.0,
            flanking: self.rates.flanking * 100.0,
            scholar: self.rates.scholar * 100.0,
            seaweed: self.rates.seaweed * 100.0,
        }
    }
}

/// Buff applied by one actor to another in one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffAttribute {
    /// Phase name.
    pub phase: String,
    /// Source actor.
    pub source: String,
    /// Target actor.
    pub target: String,
    /// Buff name.
    pub name: String,
    /// Uptime fraction, or raw value for [`RAW_VALUE_BUFFS`].
    pub uptime: f64,
}

/// Inactivity counters of one actor in one phase. Times are in ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    /// Phase name.
    pub phase: String,
    /// Actor.
    pub source: String,
    /// Number of disconnects.
    pub disconnect_count: u32,
    /// Time spent disconnected.
    pub disconnect_time: u64,
    /// Number of downs.
    pub down_count: u32,
    /// Time spent downed.
    pub down_time: u64,
    /// Number of deaths. Reserved.
    pub dead_count: u32,
    /// Time spent dead. Reserved.
    pub dead_time: u64,
}

impl EventAttribute {
    /// Total time the actor could not act.
    pub fn inactive_time(&self) -> u64 {
        self.disconnect_time + self.down_time + self.dead_time
    }
}

/// Mechanic trigger count of one actor in one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanicAttribute {
    /// Phase name.
    pub phase: String,
    /// Actor.
    pub source: String,
    /// Mechanic name.
    pub name: String,
    /// Number of triggers.
    pub count: u32,
}

/// One normalized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attribute {
    /// Phase record.
    Phase(PhaseAttribute),
    /// Player record.
    Player(PlayerAttribute),
    /// Damage record.
    Damage(DamageAttribute),
    /// Buff record.
    Buff(BuffAttribute),
    /// Event record.
    Event(EventAttribute),
    /// Mechanic record.
    Mechanic(MechanicAttribute),
}

impl Attribute {
    /// Kind discriminant.
    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::Phase(_) => AttributeKind::Phase,
            Self::Player(_) => AttributeKind::Player,
            Self::Damage(_) => AttributeKind::Damage,
            Self::Buff(_) => AttributeKind::Buff,
            Self::Event(_) => AttributeKind::Event,
            Self::Mechanic(_) => AttributeKind::Mechanic,
        }
    }

    /// Uniqueness key within the owning instance.
    pub fn key(&self) -> AttributeKey {
        match self {
            Self::Phase(p) => AttributeKey::Phase { name: p.name.clone() },
            Self::Player(p) => AttributeKey::Player { account_id: p.account_id.clone() },
            Self::Damage(d) => AttributeKey::Damage {
                phase: d.phase.clone(),
                source: d.source.clone(),
                target: d.target.clone(),
                skill: d.skill.clone(),
            },
            Self::Buff(b) => AttributeKey::Buff {
                phase: b.phase.clone(),
                source: b.source.clone(),
                target: b.target.clone(),
                name: b.name.clone(),
            },
            Self::Event(e) => AttributeKey::Event {
                phase: e.phase.clone(),
                source: e.source.clone(),
            },
            Self::Mechanic(m) => AttributeKey::Mechanic {
                phase: m.phase.clone(),
                source: m.source.clone(),
                name: m.name.clone(),
            },
        }
    }

    /// Phase the record is scoped to. A phase record reports its own name.
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::Phase(p) => Some(&p.name),
            Self::Player(_) => None,
            Self::Damage(d) => Some(&d.phase),
            Self::Buff(b) => Some(&b.phase),
            Self::Event(e) => Some(&e.phase),
            Self::Mechanic(m) => Some(&m.phase),
        }
    }

    /// Source actor, for sourced kinds.
    pub fn source(&self) -> Option<&str> {
        match self {
            Self::Damage(d) => Some(&d.source),
            Self::Buff(b) => Some(&b.source),
            Self::Event(e) => Some(&e.source),
            Self::Mechanic(m) => Some(&m.source),
            Self::Phase(_) | Self::Player(_) => None,
        }
    }

    /// Target actor, for targeted kinds.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Damage(d) => Some(&d.target),
            Self::Buff(b) => Some(&b.target),
            _ => None,
        }
    }

    /// Skill, buff, mechanic or phase name; account id for players.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Phase(p) => Some(&p.name),
            Self::Player(p) => Some(&p.account_id),
            Self::Damage(d) => Some(&d.skill),
            Self::Buff(b) => Some(&b.name),
            Self::Mechanic(m) => Some(&m.name),
            Self::Event(_) => None,
        }
    }
}

macro_rules! impl_from_record {
    ($($record:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$record> for Attribute {
                fn from(record: $record) -> Self {
                    Self::$variant(record)
                }
            }
        )*
    };
}

impl_from_record! {
    PhaseAttribute => Phase,
    PlayerAttribute => Player,
    DamageAttribute => Damage,
    BuffAttribute => Buff,
    EventAttribute => Event,
    MechanicAttribute => Mechanic,
}

/// Uniqueness key of an attribute within its instance.
///
/// Orders by kind first, then by the key columns, so a map keyed by
/// `AttributeKey` iterates deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeKey {
    /// (name)
    Phase {
        /// Phase name.
        name: String,
    },
    /// (account)
    Player {
        /// Account identifier.
        account_id: String,
    },
    /// (phase, source, target, skill)
    Damage {
        /// Phase name.
        phase: String,
        /// Source actor.
        source: String,
        /// Target actor.
        target: String,
        /// Skill name.
        skill: String,
    },
    /// (phase, source, target, name)
    Buff {
        /// Phase name.
        phase: String,
        /// Source actor.
        source: String,
        /// Target actor.
        target: String,
        /// Buff name.
        name: String,
    },
    /// (phase, source)
    Event {
        /// Phase name.
        phase: String,
        /// Actor.
        source: String,
    },
    /// (phase, source, name)
    Mechanic {
        /// Phase name.
        phase: String,
        /// Actor.
        source: String,
        /// Mechanic name.
        name: String,
    },
}

impl AttributeKey {
    /// Kind of the keyed record.
    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::Phase { .. } => AttributeKind::Phase,
            Self::Player { .. } => AttributeKind::Player,
            Self::Damage { .. } => AttributeKind::Damage,
            Self::Buff { .. } => AttributeKind::Buff,
            Self::Event { .. } => AttributeKind::Event,
            Self::Mechanic { .. } => AttributeKind::Mechanic,
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase { name } => write!(f, "phase({})", name),
            Self::Player { account_id } => write!(f, "player({})", account_id),
            Self::Damage { phase, source, target, skill } => {
                write!(f, "damage({}, {} -> {}, {})", phase, source, target, skill)
            }
            Self::Buff { phase, source, target, name } => {
                write!(f, "buff({}, {} -> {}, {})", phase, source, target, name)
            }
            Self::Event { phase, source } => write!(f, "event({}, {})", phase, source),
            Self::Mechanic { phase, source, name } => {
                write!(f, "mechanic({}, {}, {})", phase, source, name)
            }
        }
    }
}

/// A record with an existing uniqueness key was inserted again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate attribute: {key}")]
pub struct DuplicateAttributeError {
    /// Key shared by the existing and the rejected record.
    pub key: AttributeKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn damage(skill: &str, damage: i64) -> DamageAttribute {
        DamageAttribute {
            phase: "Phase1".to_string(),
            source: "Alpha".to_string(),
            target: "*All".to_string(),
            skill: skill.to_string(),
            damage,
            rates: DamageRates {
                crit: 0.4,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_key_ignores_measures() {
        let a = Attribute::from(damage("Sword", 100));
        let b = Attribute::from(damage("Sword", 900));
        let c = Attribute::from(damage("Axe", 100));

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_keys_of_different_kinds_never_collide() {
        let event = Attribute::from(EventAttribute {
            phase: "Phase1".to_string(),
            source: "Alpha".to_string(),
            ..Default::default()
        });
        let mechanic = Attribute::from(MechanicAttribute {
            phase: "Phase1".to_string(),
            source: "Alpha".to_string(),
            name: "Alpha".to_string(),
            count: 1,
        });
        assert_ne!(event.key(), mechanic.key());
        assert_eq!(event.key().kind(), AttributeKind::Event);
    }

    #[test]
    fn test_accessors() {
        let attr = Attribute::from(damage("Sword", 100));
        assert_eq!(attr.kind(), AttributeKind::Damage);
        assert_eq!(attr.phase(), Some("Phase1"));
        assert_eq!(attr.source(), Some("Alpha"));
        assert_eq!(attr.target(), Some("*All"));
        assert_eq!(attr.name(), Some("Sword"));
    }

    #[test]
    fn test_report_converts_to_percent() {
        let report = damage("Sword", 100).report();
        assert_eq!(report.total, 100);
        assert!((report.crit - 40.0).abs() < 1e-9);
        assert_eq!(report.seaweed, 0.0);
    }

    #[test]
    fn test_inactive_time() {
        let event = EventAttribute {
            phase: "Phase1".to_string(),
            source: "Alpha".to_string(),
            disconnect_time: 100,
            down_time: 250,
            dead_time: 50,
            ..Default::default()
        };
        assert_eq!(event.inactive_time(), 400);
    }

    #[test]
    fn test_player_serialization_shape() {
        let player = PlayerAttribute {
            account_id: "alpha.1234".to_string(),
            character: "Alpha".to_string(),
            party: 1,
            profession: 1,
            elite: 0,
            archetype: 1,
            conc: 0,
            condi: 0,
            heal: 0,
            tough: 0,
            death_tick: None,
        };
        let value = serde_json::to_value(&player).unwrap();
        assert_eq!(value["name"], "Alpha");
        assert_eq!(value["account"], "alpha.1234");
        assert!(value["Death"].is_null());
    }
}
