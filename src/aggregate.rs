//! Summary statistics over normalized records.
//!
//! Callers select the record subset (usually with an
//! [`AttributeFilter`](crate::store::AttributeFilter)) and hand it here.

use serde::{Deserialize, Serialize};

use crate::types::{DamageAttribute, EventAttribute, CONDITION_SKILLS, CONDI_SKILL};

/// Damage roll-up. Rates are percentages.
///
/// Rates are the unweighted mean over rows, not a damage-weighted mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DamageSummary {
    /// Summed damage.
    pub total: i64,
    /// Mean critical hit rate.
    pub crit: f64,
    /// Mean under-50% hit rate.
    pub fifty: f64,
    /// Mean flanking rate.
    pub flanking: f64,
    /// Mean scholar uptime.
    pub scholar: f64,
    /// Mean seaweed uptime.
    pub seaweed: f64,
}

impl DamageSummary {
    fn abs(self) -> Self {
        Self {
            total: self.total.abs(),
            crit: self.crit.abs(),
            fifty: self.fifty.abs(),
            flanking: self.flanking.abs(),
            scholar: self.scholar.abs(),
            seaweed: self.seaweed.abs(),
        }
    }
}

/// Whether a skill counts as condition damage.
pub fn is_condition(skill: &str) -> bool {
    CONDITION_SKILLS.contains(&skill)
}

/// Summarize damage rows for one skill group.
///
/// Rows named exactly `target_skill` win when any exist. Otherwise "condi"
/// selects the condition skills and anything else selects the rest. With
/// `absolute`, every field is reported as its magnitude.
pub fn summarize_damage<'a, I>(records: I, target_skill: &str, absolute: bool) -> DamageSummary
where
    I: IntoIterator<Item = &'a DamageAttribute>,
{
    let records: Vec<&DamageAttribute> = records.into_iter().collect();

    let exact: Vec<&DamageAttribute> = records
        .iter()
        .copied()
        .filter(|d| d.skill == target_skill)
        .collect();

    let selected = if !exact.is_empty() {
        exact
    } else if target_skill == CONDI_SKILL {
        records.into_iter().filter(|d| is_condition(&d.skill)).collect()
    } else {
        records.into_iter().filter(|d| !is_condition(&d.skill)).collect()
    };

    let summary = mean_summary(&selected);
    if absolute {
        summary.abs()
    } else {
        summary
    }
}

fn mean_summary(rows: &[&DamageAttribute]) -> DamageSummary {
    if rows.is_empty() {
        return DamageSummary::default();
    }
    let n = rows.len() as f64;
    let mean = |field: fn(&DamageAttribute) -> f64| rows.iter().map(|d| field(d)).sum::<f64>() / n * 100.0;

    DamageSummary {
        total: rows.iter().map(|d| d.damage).sum(),
        crit: mean(|d| d.rates.crit),
        fifty: mean(|d| d.rates.fifty),
        flanking: mean(|d| d.rates.flanking),
        scholar: mean(|d| d.rates.scholar),
        seaweed: mean(|d| d.rates.seaweed),
    }
}

/// Inactivity roll-up. Times are in ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    /// Summed disconnects.
    pub disconnect_count: u64,
    /// Summed disconnect time.
    pub disconnect_time: u64,
    /// Summed downs.
    pub down_count: u64,
    /// Summed down time.
    pub down_time: u64,
    /// Summed deaths.
    pub dead_count: u64,
    /// Summed dead time.
    pub dead_time: u64,
}

impl EventSummary {
    /// Total time spent disconnected, downed or dead.
    pub fn inactive_time(&self) -> u64 {
        self.disconnect_time + self.down_time + self.dead_time
    }
}

/// Element-wise sums over event rows.
///
/// Each output field accumulates the input field of the same name.
pub fn summarize_events<'a, I>(records: I) -> EventSummary
where
    I: IntoIterator<Item = &'a EventAttribute>,
{
    records
        .into_iter()
        .fold(EventSummary::default(), |mut acc, e| {
            acc.disconnect_count += u64::from(e.disconnect_count);
            acc.disconnect_time += e.disconnect_time;
            acc.down_count += u64::from(e.down_count);
            acc.down_time += e.down_time;
            acc.dead_count += u64::from(e.dead_count);
            acc.dead_time += e.dead_time;
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DamageRates, AGGREGATE_ACTOR, SHIELDED_SKILL};

    fn row(skill: &str, damage: i64, crit: f64) -> DamageAttribute {
        DamageAttribute {
            phase: "Phase1".to_string(),
            source: "Alpha".to_string(),
            target: AGGREGATE_ACTOR.to_string(),
            skill: skill.to_string(),
            damage,
            rates: DamageRates {
                crit,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_condi_falls_back_to_condition_set() {
        let rows = vec![row("Bleeding", 100, 0.0), row("Poisoned", 50, 0.0), row("power", 200, 0.5)];
        let summary = summarize_damage(&rows, CONDI_SKILL, false);
        assert_eq!(summary.total, 150);
    }

    #[test]
    fn test_power_falls_back_to_complement() {
        let rows = vec![row("Bleeding", 100, 0.0), row("Sword", 300, 0.4), row("Axe", 100, 0.2)];
        let summary = summarize_damage(&rows, "power", false);
        assert_eq!(summary.total, 400);
        assert!((summary.crit - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_skill_wins() {
        let rows = vec![row("condi", 70, 0.0), row("Bleeding", 100, 0.0)];
        assert_eq!(summarize_damage(&rows, CONDI_SKILL, false).total, 70);
    }

    #[test]
    fn test_empty_selection_is_zero() {
        let rows: Vec<DamageAttribute> = Vec::new();
        assert_eq!(summarize_damage(&rows, "power", false), DamageSummary::default());
    }

    #[test]
    fn test_absolute_shielded() {
        let rows = vec![row(SHIELDED_SKILL, -300, 0.0)];
        assert_eq!(summarize_damage(&rows, SHIELDED_SKILL, false).total, -300);
        assert_eq!(summarize_damage(&rows, SHIELDED_SKILL, true).total, 300);
    }

    #[test]
    fn test_summarize_events() {
        let events = vec![
            EventAttribute {
                phase: "Phase1".to_string(),
                source: "Alpha".to_string(),
                down_count: 1,
                down_time: 2500,
                dead_count: 1,
                dead_time: 900,
                ..Default::default()
            },
            EventAttribute {
                phase: "Phase1".to_string(),
                source: "Beta".to_string(),
                disconnect_count: 1,
                disconnect_time: 4000,
                ..Default::default()
            },
        ];

        let summary = summarize_events(&events);
        assert_eq!(summary.disconnect_count, 1);
        assert_eq!(summary.disconnect_time, 4000);
        assert_eq!(summary.down_count, 1);
        assert_eq!(summary.down_time, 2500);
        assert_eq!(summary.dead_count, 1);
        assert_eq!(summary.dead_time, 900);
        assert_eq!(summary.inactive_time(), 7400);
    }
}
