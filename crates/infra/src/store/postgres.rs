//! Postgres-backed record store: one JSONB document per record.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE ledger_records (
//!     collection TEXT   NOT NULL,
//!     id         UUID   NOT NULL,
//!     version    BIGINT NOT NULL,
//!     body       JSONB  NOT NULL,
//!     PRIMARY KEY (collection, id)
//! );
//! CREATE TABLE ledger_record_keys (
//!     collection TEXT NOT NULL,
//!     key        TEXT NOT NULL,
//!     id         UUID NOT NULL,
//!     PRIMARY KEY (collection, key)
//! );
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | anything else | - | `Backend` |
//!
//! `conditional_update` is an `UPDATE ... WHERE version = $n` in a transaction
//! that also claims any unique key the record gained; zero rows affected means
//! the version check failed. A key owned by another record rolls the write back.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use bazaar_core::{AggregateId, AggregateRoot, ExpectedVersion};

use super::record::{Record, RecordFilter, RecordStore, StoreError};

const MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_records (
    collection TEXT   NOT NULL,
    id         UUID   NOT NULL,
    version    BIGINT NOT NULL,
    body       JSONB  NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS ledger_record_keys (
    collection TEXT NOT NULL,
    key        TEXT NOT NULL,
    id         UUID NOT NULL,
    PRIMARY KEY (collection, key)
);
"#;

/// Create the record tables when missing.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(MIGRATION)
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

pub struct PostgresRecordStore<R> {
    pool: Arc<PgPool>,
    _record: PhantomData<fn() -> R>,
}

impl<R> PostgresRecordStore<R> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            _record: PhantomData,
        }
    }
}

fn encode<R: Record>(record: &R) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<R: Record>(row: &sqlx::postgres::PgRow) -> Result<R, StoreError> {
    let body: serde_json::Value = row.try_get("body").map_err(map_sqlx_error)?;
    serde_json::from_value(body).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn version_param(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Backend(format!("version {version} overflows")))
}

#[async_trait]
impl<R: Record> RecordStore<R> for PostgresRecordStore<R> {
    #[instrument(skip_all, fields(collection = R::COLLECTION))]
    async fn find(&self, filter: RecordFilter<'_, R>) -> Result<Vec<R>, StoreError> {
        let rows = sqlx::query("SELECT body FROM ledger_records WHERE collection = $1")
            .bind(R::COLLECTION)
            .fetch_all(&*self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut out = Vec::new();
        for row in &rows {
            let record: R = decode(row)?;
            if filter(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn find_by_id(&self, id: AggregateId) -> Result<Option<R>, StoreError> {
        let row = sqlx::query("SELECT body FROM ledger_records WHERE collection = $1 AND id = $2")
            .bind(R::COLLECTION)
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn find_by_unique_key(&self, key: &str) -> Result<Option<R>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT r.body
            FROM ledger_record_keys k
            JOIN ledger_records r ON r.collection = k.collection AND r.id = k.id
            WHERE k.collection = $1 AND k.key = $2
            "#,
        )
        .bind(R::COLLECTION)
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip_all, fields(collection = R::COLLECTION))]
    async fn create(&self, record: R) -> Result<R, StoreError> {
        let id: Uuid = *record.record_id().as_uuid();
        let body = encode(&record)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("INSERT INTO ledger_records (collection, id, version, body) VALUES ($1, $2, $3, $4)")
            .bind(R::COLLECTION)
            .bind(id)
            .bind(version_param(record.version())?)
            .bind(&body)
            .execute(&mut *tx)
            .await
            .map_err(|e| duplicate_or(R::COLLECTION, e, id.to_string()))?;

        for key in record.unique_keys() {
            sqlx::query("INSERT INTO ledger_record_keys (collection, key, id) VALUES ($1, $2, $3)")
                .bind(R::COLLECTION)
                .bind(&key)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| duplicate_or(R::COLLECTION, e, key.clone()))?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(record)
    }

    async fn update(&self, record: R) -> Result<R, StoreError> {
        self.conditional_update(record.record_id(), ExpectedVersion::Any, record)
            .await?
            .ok_or_else(|| StoreError::Backend("unconditional update reported a version mismatch".to_string()))
    }

    #[instrument(skip_all, fields(collection = R::COLLECTION, id = %id))]
    async fn conditional_update(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        record: R,
    ) -> Result<Option<R>, StoreError> {
        let uuid: Uuid = *id.as_uuid();
        let expected = match expected {
            ExpectedVersion::Exact(v) => Some(version_param(v)?),
            ExpectedVersion::Any => None,
        };

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let result = sqlx::query(
            r#"
            UPDATE ledger_records SET version = $3, body = $4
            WHERE collection = $1 AND id = $2 AND ($5::BIGINT IS NULL OR version = $5)
            "#,
        )
        .bind(R::COLLECTION)
        .bind(uuid)
        .bind(version_param(record.version())?)
        .bind(encode(&record)?)
        .bind(expected)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM ledger_records WHERE collection = $1 AND id = $2")
                .bind(R::COLLECTION)
                .bind(uuid)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            return match exists {
                Some(_) => Ok(None),
                None => Err(StoreError::NotFound {
                    collection: R::COLLECTION,
                    id,
                }),
            };
        }

        // Keys already held by this record are left alone; a key held by
        // another record aborts the whole write.
        for key in record.unique_keys() {
            let owner: Uuid = sqlx::query(
                r#"
                WITH claimed AS (
                    INSERT INTO ledger_record_keys (collection, key, id) VALUES ($1, $2, $3)
                    ON CONFLICT (collection, key) DO NOTHING
                    RETURNING id
                )
                SELECT id FROM claimed
                UNION ALL
                SELECT id FROM ledger_record_keys WHERE collection = $1 AND key = $2
                LIMIT 1
                "#,
            )
            .bind(R::COLLECTION)
            .bind(&key)
            .bind(uuid)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .try_get("id")
            .map_err(map_sqlx_error)?;

            if owner != uuid {
                return Err(StoreError::Duplicate {
                    collection: R::COLLECTION,
                    key,
                });
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(record))
    }
}

fn duplicate_or(collection: &'static str, err: sqlx::Error, key: String) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::Duplicate { collection, key };
    }
    map_sqlx_error(err)
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        if let Some(code) = db.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
