//! Tables behind the durable broker.
//!
//! Publishing is done on a caller-supplied connection (the broker hands out
//! one pooled connection per logical operation); consumer-side calls go
//! through the repository's pool.

use std::time::Duration;

use sqlx::{Connection, PgConnection, PgPool, Postgres};
use uuid::Uuid;

use holdfast_core::models::QueueMessage;
use holdfast_core::{PinError, PinResult};

/// Channel used for `LISTEN`/`NOTIFY` wake-ups of idle consumers.
pub const QUEUE_NOTIFY_CHANNEL: &str = "holdfast_queue";

const MESSAGE_COLUMNS: &str = r#"
    id,
    queue_name,
    exchange_name,
    payload,
    delivery_count,
    visible_at,
    locked_by,
    last_error,
    created_at
"#;

/// Append one message to `queue_name`. Returns the message id.
#[tracing::instrument(skip(conn, payload))]
pub async fn insert_message(
    conn: &mut PgConnection,
    queue_name: &str,
    exchange_name: Option<&str>,
    payload: &serde_json::Value,
) -> PinResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO queue_messages (queue_name, exchange_name, payload)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(queue_name)
    .bind(exchange_name)
    .bind(payload)
    .fetch_one(&mut *conn)
    .await?;

    notify(conn, queue_name).await;
    Ok(id)
}

/// Queues bound to `exchange_name`, in name order.
pub async fn bound_queues(conn: &mut PgConnection, exchange_name: &str) -> PinResult<Vec<String>> {
    let queues = sqlx::query_scalar::<Postgres, String>(
        r#"
        SELECT queue_name
        FROM queue_exchange_bindings
        WHERE exchange_name = $1
        ORDER BY queue_name
        "#,
    )
    .bind(exchange_name)
    .fetch_all(&mut *conn)
    .await?;
    Ok(queues)
}

/// Copy the payload into every queue bound to `exchange_name`, atomically.
///
/// An exchange without bindings is unroutable and fails with `QueuePublish`
/// rather than dropping the message.
#[tracing::instrument(skip(conn, payload))]
pub async fn insert_via_exchange(
    conn: &mut PgConnection,
    exchange_name: &str,
    payload: &serde_json::Value,
) -> PinResult<Vec<i64>> {
    let mut tx = conn.begin().await?;

    let queues = bound_queues(&mut *tx, exchange_name).await?;
    if queues.is_empty() {
        tx.rollback().await.ok();
        return Err(PinError::publish(
            exchange_name,
            "exchange has no bound queues",
        ));
    }

    let mut ids = Vec::with_capacity(queues.len());
    for queue in &queues {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO queue_messages (queue_name, exchange_name, payload)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(queue)
        .bind(exchange_name)
        .bind(payload)
        .fetch_one(&mut *tx)
        .await?;
        ids.push(id);
        notify(&mut *tx, queue).await;
    }

    tx.commit().await?;
    Ok(ids)
}

/// Wake idle consumers. Non-fatal: consumers also poll.
async fn notify(conn: &mut PgConnection, queue_name: &str) {
    if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
        .bind(QUEUE_NOTIFY_CHANNEL)
        .bind(queue_name)
        .execute(&mut *conn)
        .await
    {
        tracing::warn!(
            error = %e,
            queue = %queue_name,
            "Failed to send pg_notify, consumers will discover the message via polling"
        );
    }
}

/// Consumer-side operations and topology management.
#[derive(Clone)]
pub struct QueueRepository {
    pool: PgPool,
}

impl QueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Declare a binding. Re-declaring an existing binding is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn bind_queue(&self, exchange_name: &str, queue_name: &str) -> PinResult<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_exchange_bindings (exchange_name, queue_name)
            VALUES ($1, $2)
            ON CONFLICT (exchange_name, queue_name) DO NOTHING
            "#,
        )
        .bind(exchange_name)
        .bind(queue_name)
        .execute(&self.pool)
        .await
        .map_err(|e| PinError::QueueInitialization(e.to_string()))?;
        Ok(())
    }

    /// Atomically claim the oldest visible message on any of `queues`.
    ///
    /// The message stays invisible to other consumers for `visibility`; if it
    /// is neither acked nor released by then it is delivered again.
    #[tracing::instrument(skip(self))]
    pub async fn claim(
        &self,
        queues: &[String],
        consumer_id: Uuid,
        visibility: Duration,
    ) -> PinResult<Option<QueueMessage>> {
        let sql = format!(
            r#"
            UPDATE queue_messages
            SET locked_by = $2,
                delivery_count = delivery_count + 1,
                visible_at = NOW() + make_interval(secs => $3)
            WHERE id = (
                SELECT id
                FROM queue_messages
                WHERE queue_name = ANY($1)
                    AND visible_at <= NOW()
                ORDER BY id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        );
        let message = sqlx::query_as::<Postgres, QueueMessage>(&sql)
            .bind(queues)
            .bind(consumer_id)
            .bind(visibility.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

        if let Some(ref m) = message {
            tracing::debug!(
                message_id = m.id,
                queue = %m.queue_name,
                delivery_count = m.delivery_count,
                "Message claimed"
            );
        }
        Ok(message)
    }

    /// Remove a processed message. Returns false if the claim had expired and
    /// another consumer owns it now.
    #[tracing::instrument(skip(self))]
    pub async fn ack(&self, message_id: i64, consumer_id: Uuid) -> PinResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE id = $1 AND locked_by = $2
            "#,
        )
        .bind(message_id)
        .bind(consumer_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Release a message for redelivery after `delay`.
    #[tracing::instrument(skip(self, error))]
    pub async fn release(
        &self,
        message_id: i64,
        consumer_id: Uuid,
        delay: Duration,
        error: &str,
    ) -> PinResult<()> {
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET locked_by = NULL,
                visible_at = NOW() + make_interval(secs => $3),
                last_error = $4
            WHERE id = $1 AND locked_by = $2
            "#,
        )
        .bind(message_id)
        .bind(consumer_id)
        .bind(delay.as_secs_f64())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a message to `queue_dead_letters`.
    #[tracing::instrument(skip(self, error))]
    pub async fn dead_letter(&self, message_id: i64, consumer_id: Uuid, error: &str) -> PinResult<()> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            INSERT INTO queue_dead_letters (
                message_id, queue_name, exchange_name, payload, delivery_count, last_error, created_at
            )
            SELECT id, queue_name, exchange_name, payload, delivery_count, $3, created_at
            FROM queue_messages
            WHERE id = $1 AND locked_by = $2
            "#,
        )
        .bind(message_id)
        .bind(consumer_id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND locked_by = $2")
            .bind(message_id)
            .bind(consumer_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if moved.rows_affected() == 1 {
            tracing::warn!(message_id, error = %error, "Message dead-lettered");
        }
        Ok(())
    }

    /// Messages waiting on `queue_name`, claimed or not.
    pub async fn pending_count(&self, queue_name: &str) -> PinResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue_name = $1")
                .bind(queue_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn dead_letter_count(&self, queue_name: &str) -> PinResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_dead_letters WHERE queue_name = $1")
                .bind(queue_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
