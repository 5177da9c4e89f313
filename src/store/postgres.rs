//! PostgreSQL encounter store.
//!
//! ## Configuration
//!
//! `DATABASE_URL` selects the database. Pool sizing reads the
//! `ENCOUNTER_DB_*` variables:
//! - `ENCOUNTER_DB_MAX_CONNECTIONS` (default: 10)
//! - `ENCOUNTER_DB_MIN_CONNECTIONS` (default: 2)
//! - `ENCOUNTER_DB_ACQUIRE_TIMEOUT_SECS` (default: 10)
//! - `ENCOUNTER_DB_IDLE_TIMEOUT_SECS` (default: 300)
//! - `ENCOUNTER_DB_MAX_LIFETIME_SECS` (default: 1800)

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::env_parse;
use crate::identity::{EncounterIdentity, GuardKeys};
use crate::normalizer::NormalizedEncounter;
use crate::types::{Attribute, EncounterId, EncounterInstance};
use super::schema::ALL_SCHEMAS;
use super::{
    AttributeFilter, AttributeSet, EncounterRecord, EncounterStore, IdentityRaceError,
    LifecycleEvent, LifecycleObserver, NewEncounter, StoreError,
};

/// Connection pool settings for [`PostgresEncounterStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Connection string of the encounter database.
    pub database_url: String,
    /// Upper bound on pooled connections. Concurrent ingests of one fight
    /// each hold a connection while their commit transaction runs.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// Wait for a free connection before failing the operation.
    pub acquire_timeout: Duration,
    /// Idle time after which a connection is closed.
    pub idle_timeout: Duration,
    /// Age after which a connection is recycled.
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/encounters".to_string(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PostgresConfig {
    /// Overlay `DATABASE_URL` and the `ENCOUNTER_DB_*` variables on the defaults.
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| {
            env_parse::<u64>(name).map(Duration::from_secs).unwrap_or(fallback)
        };

        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: env_parse("ENCOUNTER_DB_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            min_connections: env_parse("ENCOUNTER_DB_MIN_CONNECTIONS")
                .unwrap_or(defaults.min_connections),
            acquire_timeout: secs("ENCOUNTER_DB_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout),
            idle_timeout: secs("ENCOUNTER_DB_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            max_lifetime: secs("ENCOUNTER_DB_MAX_LIFETIME_SECS", defaults.max_lifetime),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// PostgreSQL encounter store.
///
/// Guard uniqueness and cascade delete are enforced by the schema in
/// [`super::schema`]; attribute commits run in one transaction.
pub struct PostgresEncounterStore {
    pool: PgPool,
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

const ENCOUNTER_COLUMNS: &str = "id, url_id, area_id, started_at, duration, success, filename, \
     uploaded_at, uploaded_by, account_hash, started_at_full, started_at_half, week, instance";

impl PostgresEncounterStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            acquire_timeout_secs = config.acquire_timeout.as_secs(),
            "Connecting encounter store"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self {
            pool,
            observers: Vec::new(),
        })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Register a lifecycle observer.
    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    /// Create the tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for schema in ALL_SCHEMAS {
            sqlx::Executor::execute(&self.pool, schema).await?;
        }
        Ok(())
    }

    fn notify(&self, event: LifecycleEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    /// Parse an encounter from a database row.
    fn parse_encounter_row(row: &PgRow) -> Result<EncounterRecord, sqlx::Error> {
        let id: Uuid = row.try_get("id")?;
        let area_id: i32 = row.try_get("area_id")?;
        let instance: Json<EncounterInstance> = row.try_get("instance")?;

        Ok(EncounterRecord {
            id: EncounterId::new(id),
            url_id: row.try_get("url_id")?,
            area_id: area_id as u32,
            started_at: row.try_get("started_at")?,
            duration: row.try_get("duration")?,
            success: row.try_get("success")?,
            filename: row.try_get("filename")?,
            uploaded_at: row.try_get("uploaded_at")?,
            uploaded_by: row.try_get("uploaded_by")?,
            account_hash: row.try_get("account_hash")?,
            guards: GuardKeys {
                full: row.try_get("started_at_full")?,
                half: row.try_get("started_at_half")?,
            },
            week: row.try_get("week")?,
            instance: instance.0,
        })
    }

    /// Lock the encounter row and report whether it already has attributes.
    async fn lock_encounter(
        tx: &mut Transaction<'_, Postgres>,
        id: EncounterId,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT normalized
            FROM encounter_kernel_encounters
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(r) => Ok(r.try_get("normalized")?),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn insert_attributes(
        tx: &mut Transaction<'_, Postgres>,
        id: EncounterId,
        attributes: &AttributeSet,
    ) -> Result<(), StoreError> {
        for attribute in attributes {
            let key = serde_json::to_string(&attribute.key())
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO encounter_kernel_attributes
                    (encounter_id, kind, attribute_key, phase, source, target, name, record)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(id.as_uuid())
            .bind(attribute.kind().to_string())
            .bind(key)
            .bind(attribute.phase())
            .bind(attribute.source())
            .bind(attribute.target())
            .bind(attribute.name())
            .bind(Json(attribute))
            .execute(&mut **tx)
            .await?;
        }

        sqlx::query("UPDATE encounter_kernel_encounters SET normalized = TRUE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EncounterStore for PostgresEncounterStore {
    async fn insert_encounter(&self, encounter: NewEncounter) -> Result<EncounterRecord, StoreError> {
        let area_id = encounter.area_id;
        let identity = encounter.identity.clone();
        let record = EncounterRecord::from(encounter);

        let result = sqlx::query(
            r#"
            INSERT INTO encounter_kernel_encounters
                (id, url_id, area_id, started_at, duration, success, filename,
                 uploaded_at, uploaded_by, account_hash, started_at_full, started_at_half,
                 week, instance)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.url_id)
        .bind(record.area_id as i32)
        .bind(record.started_at)
        .bind(record.duration)
        .bind(record.success)
        .bind(&record.filename)
        .bind(record.uploaded_at)
        .bind(&record.uploaded_by)
        .bind(&record.account_hash)
        .bind(record.guards.full)
        .bind(record.guards.half)
        .bind(record.week)
        .bind(Json(&record.instance))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // A guard or the url id is taken. Guards take precedence.
            return match self.find_by_identity(area_id, &identity).await? {
                Some(existing) => Err(IdentityRaceError { existing: existing.id }.into()),
                None => Err(StoreError::UrlIdConflict(record.url_id)),
            };
        }

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
        let sql = format!(
            r#"
            SELECT {ENCOUNTER_COLUMNS}
            FROM encounter_kernel_encounters
            WHERE area_id = $1 AND account_hash = $2
              AND (started_at_full = $3 OR started_at_half = $4)
            ORDER BY started_at, id
            LIMIT 1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(area_id as i32)
            .bind(&identity.fingerprint)
            .bind(identity.guards.full)
            .bind(identity.guards.half)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_encounter_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get(&self, id: EncounterId) -> Result<Option<EncounterRecord>, StoreError> {
        let sql = format!("SELECT {ENCOUNTER_COLUMNS} FROM encounter_kernel_encounters WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_encounter_row(r)?)),
            None => Ok(None),
        }
    }

    async fn commit_attributes(&self, id: EncounterId, attributes: AttributeSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        if Self::lock_encounter(&mut tx, id).await? {
            return Err(StoreError::AlreadyNormalized(id));
        }
        Self::insert_attributes(&mut tx, id, &attributes).await?;
        tx.commit().await?;

        tracing::debug!(encounter_id = %id, records = attributes.len(), "Committed attributes");
        Ok(())
    }

    async fn replace_normalized(
        &self,
        id: EncounterId,
        normalized: NormalizedEncounter,
    ) -> Result<(), StoreError> {
        let NormalizedEncounter { instance, attributes } = normalized;

        let mut tx = self.pool.begin().await?;
        Self::lock_encounter(&mut tx, id).await?;
        sqlx::query(
            r#"
            UPDATE encounter_kernel_encounters
            SET instance = $2, duration = $3, success = $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(Json(&instance))
        .bind(instance.duration())
        .bind(instance.success)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM encounter_kernel_attributes WHERE encounter_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        Self::insert_attributes(&mut tx, id, &attributes).await?;
        tx.commit().await?;

        tracing::debug!(encounter_id = %id, records = attributes.len(), "Replaced normalization");
        Ok(())
    }

    async fn query_attributes(
        &self,
        id: EncounterId,
        filter: &AttributeFilter,
    ) -> Result<AttributeSet, StoreError> {
        if self.get(id).await?.is_none() {
            return Err(StoreError::NotFound(id));
        }

        let rows = sqlx::query(
            r#"
            SELECT record
            FROM encounter_kernel_attributes
            WHERE encounter_id = $1
              AND ($2::TEXT IS NULL OR phase = $2)
              AND ($3::TEXT IS NULL OR source = $3)
              AND ($4::TEXT IS NULL OR target = $4)
              AND ($5::TEXT IS NULL OR name = $5)
            ORDER BY attribute_key
            "#,
        )
        .bind(id.as_uuid())
        .bind(&filter.phase)
        .bind(&filter.source)
        .bind(&filter.target)
        .bind(&filter.name)
        .fetch_all(&self.pool)
        .await?;

        let mut result = AttributeSet::new();
        for row in &rows {
            let record: Json<Attribute> = row.try_get("record")?;
            result.insert(record.0)?;
        }
        Ok(result)
    }

    async fn delete(&self, id: EncounterId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            DELETE FROM encounter_kernel_encounters
            WHERE id = $1
            RETURNING url_id, filename
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                self.notify(LifecycleEvent::Destroyed {
                    id,
                    url_id: r.try_get("url_id")?,
                    filename: r.try_get("filename")?,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_settings() {
        let config = PostgresConfig::default();
        assert_eq!(config.database_url, "postgresql://localhost/encounters");
        assert!(config.min_connections <= config.max_connections);
        assert!(config.idle_timeout < config.max_lifetime);
    }
}
