//! Typed view of the analysis dump produced by the upstream log parser.
//!
//! The dump is a tree of string-keyed maps. Only the keys the normalizer
//! reads are modelled; unknown keys are ignored. Maps whose iteration order
//! could leak into output use `BTreeMap`.
//!
//! ```text
//! Category
//! ├── boss.Boss                      boss names
//! ├── encounter                      cm, start, start_tick, end_tick, success,
//! │   └── Phase.<name>.start_tick    evtc_version
//! ├── status.Player.<character>      static player attributes
//! └── combat.Phase.<phase>.Player.<character>
//!     └── Metrics                    buffs, damage, events, shielded, mechanics
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The dump could not be normalized because it lacks required data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedDumpError {
    /// The dump does not match the expected shape (missing or mistyped key).
    #[error("dump does not match the expected shape: {0}")]
    Shape(String),
    /// A block required for a combat phase is missing.
    #[error("missing `{key}` at {path}")]
    MissingKey {
        /// Location of the enclosing block.
        path: String,
        /// Name of the missing key.
        key: &'static str,
    },
    /// The start time cannot be represented as a timestamp.
    #[error("invalid start timestamp: {0}")]
    InvalidTimestamp(String),
}

impl From<serde_json::Error> for MalformedDumpError {
    fn from(e: serde_json::Error) -> Self {
        Self::Shape(e.to_string())
    }
}

/// Root of an analysis dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dump {
    /// The single top-level section.
    #[serde(rename = "Category")]
    pub category: CategorySection,
}

impl Dump {
    /// Interpret an already-parsed JSON tree as a dump.
    pub fn from_value(value: Value) -> Result<Self, MalformedDumpError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Parse a dump from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MalformedDumpError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parse a dump from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, MalformedDumpError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Account identifiers of every player in the roster.
    pub fn account_ids(&self) -> Vec<&str> {
        self.category
            .status
            .players
            .values()
            .map(|p| p.account.as_str())
            .collect()
    }
}

/// Encounter metadata, roster and per-phase combat metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySection {
    /// Boss identity.
    pub boss: BossSection,
    /// Fight-level metadata and phase boundaries.
    pub encounter: EncounterSection,
    /// Static player attributes.
    pub status: StatusSection,
    /// Per-phase, per-player combat metrics.
    pub combat: CombatSection,
}

/// Boss identity block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BossSection {
    /// Boss names, in dump order.
    #[serde(rename = "Boss")]
    pub bosses: BossNames,
}

impl BossSection {
    /// All boss names concatenated in dump order.
    pub fn identifier(&self) -> String {
        match &self.bosses {
            BossNames::Keyed(map) => map.keys().map(String::as_str).collect(),
            BossNames::Listed(names) => names.concat(),
            BossNames::Single(name) => name.clone(),
        }
    }
}

/// The upstream tool emits boss names in a few shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BossNames {
    /// Map keyed by boss name (insertion order preserved).
    Keyed(serde_json::Map<String, Value>),
    /// Plain list of names.
    Listed(Vec<String>),
    /// A single name.
    Single(String),
}

/// Fight-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncounterSection {
    /// Challenge-mode flag.
    pub cm: bool,
    /// Start of the fight, unix seconds.
    pub start: f64,
    /// Start tick.
    pub start_tick: u64,
    /// End tick.
    pub end_tick: u64,
    /// Whether the fight was won.
    pub success: bool,
    /// Recording tool version.
    pub evtc_version: String,
    /// Phase boundaries.
    #[serde(rename = "Phase")]
    pub phases: BTreeMap<String, PhaseBoundary>,
}

/// Start of one named phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseBoundary {
    /// Tick at which the phase begins.
    pub start_tick: u64,
}

/// Roster block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSection {
    /// Players keyed by character name.
    #[serde(rename = "Player")]
    pub players: BTreeMap<String, PlayerStatus>,
}

/// Static attributes of one player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStatus {
    /// External account identifier.
    pub account: String,
    /// Party / squad subgroup.
    pub party: u32,
    /// Profession code.
    pub profession: u32,
    /// Elite specialization code.
    pub elite: u32,
    /// Archetype code.
    pub archetype: u32,
    /// Concentration stat.
    pub concentration: u32,
    /// Condition damage stat.
    pub condition: u32,
    /// Healing power stat.
    pub healing: u32,
    /// Toughness stat.
    pub toughness: u32,
}

/// Combat metrics for every phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatSection {
    /// Phases keyed by name, including the "All" aggregate.
    #[serde(rename = "Phase")]
    pub phases: BTreeMap<String, CombatPhase>,
}

/// Combat metrics of one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombatPhase {
    /// Players keyed by character name.
    #[serde(rename = "Player", default)]
    pub players: BTreeMap<String, CombatPlayer>,
}

/// Combat metrics of one player in one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombatPlayer {
    /// Metric blocks.
    #[serde(rename = "Metrics", default)]
    pub metrics: Option<PlayerMetrics>,
    /// Mechanics annotated next to, rather than inside, the metrics block.
    #[serde(default)]
    pub mechanics: Option<BTreeMap<String, u32>>,
}

impl CombatPlayer {
    /// Mechanic trigger counts, wherever the tool put them.
    pub fn mechanics(&self) -> Option<&BTreeMap<String, u32>> {
        self.metrics
            .as_ref()
            .and_then(|m| m.mechanics.as_ref())
            .or(self.mechanics.as_ref())
    }
}

/// All metric blocks of one player in one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerMetrics {
    /// Buff uptimes, incoming and outgoing.
    #[serde(default)]
    pub buffs: DirectedMap<BTreeMap<String, f64>>,
    /// Damage, incoming and outgoing.
    #[serde(default)]
    pub damage: DirectedMap<DamageStats>,
    /// Disconnect and down counters.
    #[serde(default)]
    pub events: Option<EventCounters>,
    /// Incoming damage absorbed by shields.
    #[serde(default)]
    pub shielded: Option<ShieldBlock>,
    /// Mechanic trigger counts.
    #[serde(default)]
    pub mechanics: Option<BTreeMap<String, u32>>,
}

/// A pair of maps keyed by the other actor: who it came from, who it went to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectedMap<T> {
    /// Keyed by source actor.
    #[serde(rename = "From", default = "BTreeMap::new")]
    pub from: BTreeMap<String, T>,
    /// Keyed by target actor.
    #[serde(rename = "To", default = "BTreeMap::new")]
    pub to: BTreeMap<String, T>,
}

impl<T> Default for DirectedMap<T> {
    fn default() -> Self {
        Self {
            from: BTreeMap::new(),
            to: BTreeMap::new(),
        }
    }
}

/// Percent-valued rate fields (0–100). Absent keys read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRates {
    /// Critical hit rate.
    #[serde(default)]
    pub crit: Option<f64>,
    /// Rate of hits while the target was under 50% health.
    #[serde(default)]
    pub fifty: Option<f64>,
    /// Flanking rate.
    #[serde(default)]
    pub flanking: Option<f64>,
    /// Scholar rune uptime.
    #[serde(default)]
    pub scholar: Option<f64>,
    /// Seaweed salad uptime.
    #[serde(default)]
    pub seaweed: Option<f64>,
}

/// Damage dealt to or received from one actor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DamageStats {
    /// Per-skill breakdown.
    #[serde(rename = "Skill", default)]
    pub skills: Option<BTreeMap<String, SkillStats>>,
    /// Condition damage total. Required when no breakdown is recorded.
    #[serde(default)]
    pub condi: Option<i64>,
    /// Power damage total. Required when no breakdown is recorded.
    #[serde(default)]
    pub power: Option<i64>,
    /// Rates shared by the summary totals.
    #[serde(flatten)]
    pub rates: RawRates,
}

/// Damage of one skill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillStats {
    /// Damage total.
    pub total: i64,
    /// Skill rates.
    #[serde(flatten)]
    pub rates: RawRates,
}

/// Disconnect and down counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventCounters {
    /// Number of disconnects.
    pub disconnects: u32,
    /// Time spent disconnected (ticks, may be fractional).
    pub disconnect_time: f64,
    /// Number of downs.
    pub downs: u32,
    /// Time spent downed (ticks, may be fractional).
    pub down_time: f64,
}

/// Shielded damage keyed by source actor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShieldBlock {
    /// Keyed by source actor; the normalizer reads the aggregate actor.
    #[serde(rename = "From", default)]
    pub from: BTreeMap<String, SkillStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boss_identifier_shapes() {
        let keyed: BossSection = serde_json::from_value(json!({
            "Boss": {"Nikare": {}, "Kenut": {}}
        }))
        .unwrap();
        assert_eq!(keyed.identifier(), "NikareKenut");

        let listed: BossSection =
            serde_json::from_value(json!({"Boss": ["Sabetha"]})).unwrap();
        assert_eq!(listed.identifier(), "Sabetha");

        let single: BossSection =
            serde_json::from_value(json!({"Boss": "Gorseval"})).unwrap();
        assert_eq!(single.identifier(), "Gorseval");
    }

    #[test]
    fn test_damage_stats_defaults() {
        let stats: DamageStats = serde_json::from_value(json!({
            "power": 1500,
            "crit": 25.0,
            "dps": 300
        }))
        .unwrap();
        assert!(stats.skills.is_none());
        assert_eq!(stats.condi, None);
        assert_eq!(stats.power, Some(1500));
        assert_eq!(stats.rates.crit, Some(25.0));
        assert_eq!(stats.rates.seaweed, None);
    }

    #[test]
    fn test_mechanics_lookup_prefers_metrics() {
        let player: CombatPlayer = serde_json::from_value(json!({
            "Metrics": {"mechanics": {"Green": 2}},
            "mechanics": {"Green": 5}
        }))
        .unwrap();
        assert_eq!(player.mechanics().unwrap()["Green"], 2);

        let outer: CombatPlayer = serde_json::from_value(json!({
            "mechanics": {"Green": 5}
        }))
        .unwrap();
        assert_eq!(outer.mechanics().unwrap()["Green"], 5);
    }

    #[test]
    fn test_missing_success_is_shape_error() {
        let err = Dump::from_value(json!({
            "Category": {
                "boss": {"Boss": "Gorseval"},
                "encounter": {
                    "cm": false, "start": 0, "start_tick": 0, "end_tick": 1,
                    "evtc_version": "x", "Phase": {}
                },
                "status": {"Player": {}},
                "combat": {"Phase": {}}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, MalformedDumpError::Shape(ref msg) if msg.contains("success")));
    }
}
