//! Core types for the encounter kernel.

pub mod attribute;
pub mod dump;
pub mod encounter;

pub use attribute::{
    Attribute, AttributeKey, AttributeKind, BuffAttribute, DamageAttribute, DamageRates,
    DamageReport, DuplicateAttributeError, EventAttribute, MechanicAttribute, PhaseAttribute,
    PlayerAttribute, AGGREGATE_ACTOR, AGGREGATE_PHASE, CONDITION_SKILLS, CONDI_SKILL,
    POWER_SKILL, RAW_VALUE_BUFFS, SHIELDED_SKILL,
};
pub use dump::{Dump, MalformedDumpError};
pub use encounter::{EncounterId, EncounterInstance, TICKS_PER_SECOND};
