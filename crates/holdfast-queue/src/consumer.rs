//! Intent consumer: worker pool, LISTEN/NOTIFY or polling, redelivery and
//! dead-lettering.
//!
//! Shutdown: [`IntentConsumer::shutdown`] stops the pool from claiming new
//! messages; it does not wait for in-flight handlers. Messages whose handler
//! never finishes become visible again once their visibility timeout passes.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use holdfast_core::config::QueueConfig;
use holdfast_core::constants::ALL_QUEUES;
use holdfast_core::models::{LifecycleIntent, QueueMessage};
use holdfast_core::{PinResult, TaskError};
use holdfast_db::queue::QUEUE_NOTIFY_CHANNEL;

use crate::broker::MessageSource;

/// Maximum delay in seconds before a failed message is delivered again.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Exponential back-off for the given number of failed deliveries, capped.
#[inline]
pub(crate) fn compute_retry_backoff_seconds(failed_deliveries: i32) -> u64 {
    let exponent = failed_deliveries.clamp(0, 31) as u32;
    2_u64.pow(exponent).min(MAX_RETRY_BACKOFF_SECS)
}

/// Performs the storage-side effect of an intent.
///
/// Delivery is at-least-once, so implementations must tolerate seeing the
/// same intent more than once.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    async fn handle(&self, intent: LifecycleIntent) -> Result<(), TaskError>;
}

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub queues: Vec<String>,
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub visibility_timeout_seconds: u64,
    /// A message that failed this many deliveries is dead-lettered.
    pub max_deliveries: i32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::from_queue_config(&QueueConfig::default())
    }
}

impl ConsumerConfig {
    /// Consume every known queue with the configured limits.
    pub fn from_queue_config(config: &QueueConfig) -> Self {
        Self {
            queues: ALL_QUEUES.iter().map(|q| q.to_string()).collect(),
            max_workers: config.max_workers,
            poll_interval_ms: config.poll_interval_ms,
            visibility_timeout_seconds: config.visibility_timeout_seconds,
            max_deliveries: config.max_deliveries,
        }
    }

    pub fn with_queues(mut self, queues: &[&str]) -> Self {
        self.queues = queues.iter().map(|q| q.to_string()).collect();
        self
    }

    fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

/// What happened to one claimed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Redelivered,
    DeadLettered,
}

pub struct IntentConsumer {
    consumer_id: Uuid,
    shutdown_tx: mpsc::Sender<()>,
}

impl IntentConsumer {
    /// Spawn the worker pool.
    ///
    /// If `listen_pool` is `Some`, idle workers also wake on `NOTIFY` from
    /// publishers instead of waiting for the next poll.
    pub fn start(
        source: Arc<dyn MessageSource>,
        handler: Arc<dyn IntentHandler>,
        config: ConsumerConfig,
        listen_pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let consumer_id = Uuid::new_v4();

        tokio::spawn(async move {
            Self::worker_pool(source, handler, config, consumer_id, shutdown_rx, listen_pool)
                .await;
        });

        Self {
            consumer_id,
            shutdown_tx,
        }
    }

    pub fn consumer_id(&self) -> Uuid {
        self.consumer_id
    }

    async fn worker_pool(
        source: Arc<dyn MessageSource>,
        handler: Arc<dyn IntentHandler>,
        config: ConsumerConfig,
        consumer_id: Uuid,
        mut shutdown_rx: mpsc::Receiver<()>,
        listen_pool: Option<sqlx::PgPool>,
    ) {
        tracing::info!(
            consumer_id = %consumer_id,
            queues = ?config.queues,
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = listen_pool.is_some(),
            "Intent consumer started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = listen_pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(QUEUE_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                if tx.send(()).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(consumer_id = %consumer_id, "Intent consumer shutting down");
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&source, &handler, &config, consumer_id, &semaphore).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&source, &handler, &config, consumer_id, &semaphore).await;
                }
            }
        }

        tracing::info!(consumer_id = %consumer_id, "Intent consumer stopped");
    }

    async fn claim_and_dispatch_one(
        source: &Arc<dyn MessageSource>,
        handler: &Arc<dyn IntentHandler>,
        config: &ConsumerConfig,
        consumer_id: Uuid,
        semaphore: &Arc<Semaphore>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match source
            .claim(&config.queues, consumer_id, config.visibility_timeout())
            .await
        {
            Ok(Some(message)) => {
                let source = source.clone();
                let handler = handler.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) =
                        Self::process_message(source.as_ref(), handler.as_ref(), &config, consumer_id, message)
                            .await
                    {
                        tracing::error!(error = %e, "Failed to settle message");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No messages available");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim message");
            }
        }
    }

    /// Claim and process a single message on the calling task. Returns
    /// `None` when nothing was available.
    pub async fn run_once(
        source: &dyn MessageSource,
        handler: &dyn IntentHandler,
        config: &ConsumerConfig,
        consumer_id: Uuid,
    ) -> PinResult<Option<Outcome>> {
        match source
            .claim(&config.queues, consumer_id, config.visibility_timeout())
            .await?
        {
            Some(message) => {
                Self::process_message(source, handler, config, consumer_id, message)
                    .await
                    .map(Some)
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip_all, fields(message.id = message.id, queue = %message.queue_name, delivery = message.delivery_count))]
    async fn process_message(
        source: &dyn MessageSource,
        handler: &dyn IntentHandler,
        config: &ConsumerConfig,
        consumer_id: Uuid,
        message: QueueMessage,
    ) -> PinResult<Outcome> {
        let intent = match message.intent() {
            Ok(intent) => intent,
            Err(e) => {
                tracing::error!(error = %e, "Undecodable message, dead-lettering");
                source
                    .dead_letter(message.id, consumer_id, &e.to_string())
                    .await?;
                return Ok(Outcome::DeadLettered);
            }
        };
        let description = intent.to_string();

        // A handler still running when the claim expires would race a
        // redelivery of the same message, so it is bounded by the claim.
        let result = tokio::time::timeout(config.visibility_timeout(), handler.handle(intent))
            .await
            .unwrap_or_else(|_| {
                Err(TaskError::recoverable(anyhow::anyhow!(
                    "handler exceeded visibility timeout"
                )))
            });

        match result {
            Ok(()) => {
                if !source.ack(message.id, consumer_id).await? {
                    tracing::warn!(intent = %description, "Claim expired before ack, message will be redelivered");
                }
                tracing::info!(intent = %description, "Intent processed");
                Ok(Outcome::Acked)
            }
            Err(e) if e.is_recoverable() && message.delivery_count < config.max_deliveries => {
                let backoff = compute_retry_backoff_seconds(message.delivery_count - 1);
                tracing::warn!(
                    intent = %description,
                    error = %e,
                    backoff_seconds = backoff,
                    max_deliveries = config.max_deliveries,
                    "Intent failed, scheduling redelivery"
                );
                source
                    .release(
                        message.id,
                        consumer_id,
                        Duration::from_secs(backoff),
                        &e.to_string(),
                    )
                    .await?;
                Ok(Outcome::Redelivered)
            }
            Err(e) => {
                tracing::error!(
                    intent = %description,
                    error = %e,
                    unrecoverable = !e.is_recoverable(),
                    "Intent failed permanently, dead-lettering"
                );
                source
                    .dead_letter(message.id, consumer_id, &e.to_string())
                    .await?;
                Ok(Outcome::DeadLettered)
            }
        }
    }

    /// Signals the pool to stop claiming. Returns immediately.
    pub async fn shutdown(&self) {
        tracing::info!(consumer_id = %self.consumer_id, "Initiating intent consumer shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}
