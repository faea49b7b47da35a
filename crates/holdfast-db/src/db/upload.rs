use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};

use holdfast_core::models::{NewUpload, UploadRecord};
use holdfast_core::retention::{extended, garbage_collect_at};
use holdfast_core::{Clock, PinError, PinResult};

const UPLOAD_COLUMNS: &str = r#"
    id,
    content_id,
    kind,
    name,
    network_name,
    hold_months,
    user_name,
    co_owners,
    garbage_collect_at,
    created_at,
    updated_at
"#;

/// Durable record of every accepted upload and its retention window.
///
/// Writes to the same (content id, network, user) key are serialized by the
/// implementation; writes to different keys never wait on each other.
#[async_trait::async_trait]
pub trait UploadLedger: Send + Sync {
    /// Insert a new record. Fails with `DuplicateRecord` if the key exists.
    async fn create(&self, upload: NewUpload) -> PinResult<UploadRecord>;

    /// Extend an existing record. The stored garbage collection date only
    /// ever moves forward; `user_name` becomes a co-owner if it was not one.
    async fn renew(
        &self,
        content_id: &str,
        network_name: &str,
        user_name: &str,
        hold_months: i64,
    ) -> PinResult<UploadRecord>;

    async fn find_by_content_network_user(
        &self,
        content_id: &str,
        network_name: &str,
        user_name: &str,
    ) -> PinResult<UploadRecord>;

    async fn find_by_network(&self, network_name: &str) -> PinResult<Vec<UploadRecord>>;

    async fn find_by_user(&self, user_name: &str) -> PinResult<Vec<UploadRecord>>;

    async fn find_by_content(&self, content_id: &str) -> PinResult<Vec<UploadRecord>>;

    async fn find_by_content_and_user(
        &self,
        content_id: &str,
        user_name: &str,
    ) -> PinResult<Vec<UploadRecord>>;

    async fn list_all(&self) -> PinResult<Vec<UploadRecord>>;

    /// Delete and return every record with `garbage_collect_at <= now`.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> PinResult<Vec<UploadRecord>>;
}

/// Postgres-backed ledger.
#[derive(Clone)]
pub struct UploadRepository {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl UploadRepository {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn fetch_many(&self, filter: &str, binds: &[&str]) -> PinResult<Vec<UploadRecord>> {
        let sql = format!(
            "SELECT {} FROM uploads {} ORDER BY created_at ASC, id ASC",
            UPLOAD_COLUMNS, filter
        );
        let mut query = sqlx::query_as::<Postgres, UploadRecord>(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let records = query.fetch_all(&self.pool).await?;
        Ok(records)
    }
}

fn map_insert_error(err: sqlx::Error, upload: &NewUpload) -> PinError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => PinError::DuplicateRecord {
            content_id: upload.content_id.clone(),
            network: upload.network_name.clone(),
            user: upload.user_name.clone(),
        },
        other => PinError::Database(other),
    }
}

#[async_trait::async_trait]
impl UploadLedger for UploadRepository {
    #[tracing::instrument(skip(self, upload), fields(content_id = %upload.content_id, network = %upload.network_name, user = %upload.user_name))]
    async fn create(&self, upload: NewUpload) -> PinResult<UploadRecord> {
        let now = self.clock.now();
        let gc_at = garbage_collect_at(now, upload.hold_months)?;

        // The unique index on (content_id, network_name, user_name) is the
        // duplicate check; a failed insert leaves the table untouched.
        let sql = format!(
            r#"
            INSERT INTO uploads (
                content_id, kind, name, network_name, hold_months, user_name,
                co_owners, garbage_collect_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, ARRAY[$6]::TEXT[], $7, $8, $8)
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        );
        let record = sqlx::query_as::<Postgres, UploadRecord>(&sql)
            .bind(&upload.content_id)
            .bind(upload.kind.to_string())
            .bind(&upload.name)
            .bind(&upload.network_name)
            .bind(upload.hold_months)
            .bind(&upload.user_name)
            .bind(gc_at)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, &upload))?;

        tracing::info!(
            upload_id = record.id,
            kind = %record.kind,
            garbage_collect_at = %record.garbage_collect_at,
            "Upload recorded"
        );

        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn renew(
        &self,
        content_id: &str,
        network_name: &str,
        user_name: &str,
        hold_months: i64,
    ) -> PinResult<UploadRecord> {
        let now = self.clock.now();
        let candidate = garbage_collect_at(now, hold_months)?;

        let mut tx = self.pool.begin().await?;

        // Row lock serializes this renew against a concurrent sweep or renew
        // of the same record.
        let sql = format!(
            r#"
            SELECT {}
            FROM uploads
            WHERE content_id = $1 AND network_name = $2 AND user_name = $3
            FOR UPDATE
            "#,
            UPLOAD_COLUMNS
        );
        let current = sqlx::query_as::<Postgres, UploadRecord>(&sql)
            .bind(content_id)
            .bind(network_name)
            .bind(user_name)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| PinError::not_found(content_id, network_name, user_name))?;

        let kept = extended(current.garbage_collect_at, candidate);
        let hold = if kept > current.garbage_collect_at {
            hold_months
        } else {
            current.hold_months
        };

        let sql = format!(
            r#"
            UPDATE uploads
            SET co_owners = CASE
                    WHEN $2 = ANY(co_owners) THEN co_owners
                    ELSE array_append(co_owners, $2)
                END,
                garbage_collect_at = $3,
                hold_months = $4,
                updated_at = $5
            WHERE id = $1
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        );
        let record = sqlx::query_as::<Postgres, UploadRecord>(&sql)
            .bind(current.id)
            .bind(user_name)
            .bind(kept)
            .bind(hold)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            upload_id = record.id,
            extended = kept > current.garbage_collect_at,
            garbage_collect_at = %record.garbage_collect_at,
            "Upload renewed"
        );

        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_content_network_user(
        &self,
        content_id: &str,
        network_name: &str,
        user_name: &str,
    ) -> PinResult<UploadRecord> {
        let sql = format!(
            r#"
            SELECT {}
            FROM uploads
            WHERE content_id = $1 AND network_name = $2 AND user_name = $3
            "#,
            UPLOAD_COLUMNS
        );
        sqlx::query_as::<Postgres, UploadRecord>(&sql)
            .bind(content_id)
            .bind(network_name)
            .bind(user_name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PinError::not_found(content_id, network_name, user_name))
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_network(&self, network_name: &str) -> PinResult<Vec<UploadRecord>> {
        self.fetch_many("WHERE network_name = $1", &[network_name])
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_user(&self, user_name: &str) -> PinResult<Vec<UploadRecord>> {
        self.fetch_many("WHERE user_name = $1", &[user_name]).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_content(&self, content_id: &str) -> PinResult<Vec<UploadRecord>> {
        self.fetch_many("WHERE content_id = $1", &[content_id]).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_content_and_user(
        &self,
        content_id: &str,
        user_name: &str,
    ) -> PinResult<Vec<UploadRecord>> {
        self.fetch_many(
            "WHERE content_id = $1 AND user_name = $2",
            &[content_id, user_name],
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_all(&self) -> PinResult<Vec<UploadRecord>> {
        self.fetch_many("", &[]).await
    }

    #[tracing::instrument(skip(self))]
    async fn sweep_expired(&self, now: DateTime<Utc>) -> PinResult<Vec<UploadRecord>> {
        // DELETE takes the row locks itself. A row held by an in-flight renew
        // is re-checked against the predicate after that renew commits.
        let sql = format!(
            r#"
            DELETE FROM uploads
            WHERE garbage_collect_at <= $1
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        );
        let mut expired = sqlx::query_as::<Postgres, UploadRecord>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        expired.sort_by_key(|r| r.id);

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired uploads removed from ledger");
        }

        Ok(expired)
    }
}

/// Factory function to build the Postgres ledger behind the trait object.
pub fn create_upload_ledger(pool: PgPool, clock: Arc<dyn Clock>) -> Arc<dyn UploadLedger> {
    Arc::new(UploadRepository::new(pool, clock))
}
