//! Broker seams.
//!
//! A [`Broker`] hands out one [`BrokerChannel`] per logical operation. The
//! channel owns whatever connection it needs and gives it back on drop, so a
//! broken connection affects only the operation that holds it.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use holdfast_core::models::QueueMessage;
use holdfast_core::{PinError, PinResult};
use holdfast_db::queue::{insert_message, insert_via_exchange};
use holdfast_db::QueueRepository;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Acquire a channel. Fails with `QueueInitialization` if the broker is
    /// unreachable.
    async fn open_channel(&self) -> PinResult<Box<dyn BrokerChannel>>;

    /// Route messages published to `exchange_name` into `queue_name` as well.
    async fn bind_queue(&self, exchange_name: &str, queue_name: &str) -> PinResult<()>;
}

/// A scoped handle for publishing. Dropping it releases the connection.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Durably enqueue `payload` on `queue_name`.
    async fn publish(&mut self, queue_name: &str, payload: &serde_json::Value) -> PinResult<()>;

    /// Durably enqueue `payload` on every queue bound to `exchange_name`.
    /// Returns the number of queues it was delivered to.
    async fn publish_to_exchange(
        &mut self,
        exchange_name: &str,
        payload: &serde_json::Value,
    ) -> PinResult<usize>;
}

/// Consumer side of the broker.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn claim(
        &self,
        queues: &[String],
        consumer_id: Uuid,
        visibility: Duration,
    ) -> PinResult<Option<QueueMessage>>;

    async fn ack(&self, message_id: i64, consumer_id: Uuid) -> PinResult<bool>;

    async fn release(
        &self,
        message_id: i64,
        consumer_id: Uuid,
        delay: Duration,
        error: &str,
    ) -> PinResult<()>;

    async fn dead_letter(&self, message_id: i64, consumer_id: Uuid, error: &str) -> PinResult<()>;
}

/// Broker backed by the `queue_messages` tables.
#[derive(Clone)]
pub struct PgBroker {
    pool: PgPool,
    repository: QueueRepository,
}

impl PgBroker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: QueueRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn repository(&self) -> &QueueRepository {
        &self.repository
    }
}

struct PgChannel {
    conn: PoolConnection<Postgres>,
}

fn into_publish_error(target: &str, err: PinError) -> PinError {
    match err {
        PinError::Database(e) => PinError::publish(target, e),
        other => other,
    }
}

#[async_trait]
impl BrokerChannel for PgChannel {
    async fn publish(&mut self, queue_name: &str, payload: &serde_json::Value) -> PinResult<()> {
        insert_message(&mut *self.conn, queue_name, None, payload)
            .await
            .map_err(|e| into_publish_error(queue_name, e))?;
        Ok(())
    }

    async fn publish_to_exchange(
        &mut self,
        exchange_name: &str,
        payload: &serde_json::Value,
    ) -> PinResult<usize> {
        let ids = insert_via_exchange(&mut *self.conn, exchange_name, payload)
            .await
            .map_err(|e| into_publish_error(exchange_name, e))?;
        Ok(ids.len())
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn open_channel(&self) -> PinResult<Box<dyn BrokerChannel>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| PinError::QueueInitialization(e.to_string()))?;
        Ok(Box::new(PgChannel { conn }))
    }

    async fn bind_queue(&self, exchange_name: &str, queue_name: &str) -> PinResult<()> {
        self.repository.bind_queue(exchange_name, queue_name).await
    }
}

#[async_trait]
impl MessageSource for QueueRepository {
    async fn claim(
        &self,
        queues: &[String],
        consumer_id: Uuid,
        visibility: Duration,
    ) -> PinResult<Option<QueueMessage>> {
        QueueRepository::claim(self, queues, consumer_id, visibility).await
    }

    async fn ack(&self, message_id: i64, consumer_id: Uuid) -> PinResult<bool> {
        QueueRepository::ack(self, message_id, consumer_id).await
    }

    async fn release(
        &self,
        message_id: i64,
        consumer_id: Uuid,
        delay: Duration,
        error: &str,
    ) -> PinResult<()> {
        QueueRepository::release(self, message_id, consumer_id, delay, error).await
    }

    async fn dead_letter(&self, message_id: i64, consumer_id: Uuid, error: &str) -> PinResult<()> {
        QueueRepository::dead_letter(self, message_id, consumer_id, error).await
    }
}
