//! SQL schema for the PostgreSQL encounter store.

/// SQL schema for the encounter table.
///
/// The two guard constraints make registration insert-or-fetch: a second
/// upload of the same fight collides on at least one of them.
pub const ENCOUNTER_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS encounter_kernel_encounters (
    id UUID PRIMARY KEY,
    url_id TEXT NOT NULL,
    area_id INTEGER NOT NULL,
    started_at BIGINT NOT NULL,
    duration DOUBLE PRECISION NOT NULL,
    success BOOLEAN NOT NULL,
    filename TEXT NOT NULL,
    uploaded_at BIGINT NOT NULL,
    uploaded_by TEXT,
    account_hash TEXT NOT NULL,
    started_at_full BIGINT NOT NULL,
    started_at_half BIGINT NOT NULL,
    week BIGINT NOT NULL,
    instance JSONB NOT NULL,
    normalized BOOLEAN NOT NULL DEFAULT FALSE,

    CONSTRAINT encounter_url_id_key UNIQUE (url_id),
    CONSTRAINT encounter_guard_full_key UNIQUE (area_id, account_hash, started_at_full),
    CONSTRAINT encounter_guard_half_key UNIQUE (area_id, account_hash, started_at_half)
);

CREATE INDEX IF NOT EXISTS idx_encounter_week
    ON encounter_kernel_encounters(week, area_id);
"#;

/// SQL schema for the attribute table.
///
/// `attribute_key` is the canonical JSON of the record's uniqueness key and
/// includes its kind, so the constraint is per kind.
pub const ATTRIBUTE_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS encounter_kernel_attributes (
    encounter_id UUID NOT NULL
        REFERENCES encounter_kernel_encounters(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    attribute_key TEXT NOT NULL,
    phase TEXT,
    source TEXT,
    target TEXT,
    name TEXT,
    record JSONB NOT NULL,

    CONSTRAINT attribute_unique_key UNIQUE (encounter_id, attribute_key),
    CONSTRAINT attribute_kind_check
        CHECK (kind IN ('phase', 'player', 'damage', 'buff', 'event', 'mechanic'))
);

CREATE INDEX IF NOT EXISTS idx_attribute_lookup
    ON encounter_kernel_attributes(encounter_id, kind, phase, source);
"#;

/// Every schema statement, in creation order.
pub const ALL_SCHEMAS: [&str; 2] = [ENCOUNTER_TABLE_SCHEMA, ATTRIBUTE_TABLE_SCHEMA];
