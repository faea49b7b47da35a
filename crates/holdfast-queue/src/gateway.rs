use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use holdfast_core::constants::DEFAULT_BINDINGS;
use holdfast_core::models::{LifecycleIntent, Route};
use holdfast_core::{PinError, PinResult};

use crate::broker::{Broker, BrokerChannel};

/// Publishes lifecycle intents.
///
/// Acceptance means the broker stored the message durably, not that a
/// consumer has seen it. Each call opens its own channel and drops it before
/// returning; no connection state outlives a call.
#[derive(Clone)]
pub struct JobQueueGateway {
    broker: Arc<dyn Broker>,
    operation_timeout: Duration,
}

impl JobQueueGateway {
    pub fn new(broker: Arc<dyn Broker>, operation_timeout: Duration) -> Self {
        Self {
            broker,
            operation_timeout,
        }
    }

    /// Declare the standard exchange bindings.
    #[tracing::instrument(skip(self))]
    pub async fn declare_topology(&self) -> PinResult<()> {
        for (exchange, queue) in DEFAULT_BINDINGS {
            bounded(
                self.operation_timeout,
                self.broker.bind_queue(exchange, queue),
                || PinError::QueueInitialization(format!("binding {} to {} timed out", queue, exchange)),
            )
            .await?;
        }
        tracing::info!(bindings = DEFAULT_BINDINGS.len(), "Queue topology declared");
        Ok(())
    }

    async fn channel(&self) -> PinResult<Box<dyn BrokerChannel>> {
        bounded(self.operation_timeout, self.broker.open_channel(), || {
            PinError::QueueInitialization("timed out acquiring broker channel".to_string())
        })
        .await
    }

    /// Publish directly to `queue_name`.
    #[tracing::instrument(skip(self, intent), fields(intent = %intent))]
    pub async fn publish(&self, queue_name: &str, intent: &LifecycleIntent) -> PinResult<()> {
        let payload = serde_json::to_value(intent)?;
        let mut channel = self.channel().await?;
        bounded(
            self.operation_timeout,
            channel.publish(queue_name, &payload),
            || PinError::publish(queue_name, "publish timed out"),
        )
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, queue = %queue_name, "Failed to publish intent");
        })?;

        tracing::info!(queue = %queue_name, "Intent published");
        Ok(())
    }

    /// Publish through `exchange_name` to every bound queue. Returns how many
    /// queues received the message.
    #[tracing::instrument(skip(self, intent), fields(intent = %intent))]
    pub async fn publish_with_exchange(
        &self,
        exchange_name: &str,
        intent: &LifecycleIntent,
    ) -> PinResult<usize> {
        let payload = serde_json::to_value(intent)?;
        let mut channel = self.channel().await?;
        let delivered = bounded(
            self.operation_timeout,
            channel.publish_to_exchange(exchange_name, &payload),
            || PinError::publish(exchange_name, "publish timed out"),
        )
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, exchange = %exchange_name, "Failed to publish intent");
        })?;

        tracing::info!(exchange = %exchange_name, queues = delivered, "Intent published");
        Ok(delivered)
    }

    /// Publish on the intent's default route.
    pub async fn dispatch(&self, intent: &LifecycleIntent) -> PinResult<()> {
        match intent.route() {
            Route::Queue(queue) => self.publish(queue, intent).await,
            Route::Exchange(exchange) => self.publish_with_exchange(exchange, intent).await.map(|_| ()),
        }
    }
}

async fn bounded<T, F, E>(limit: Duration, fut: F, on_timeout: E) -> PinResult<T>
where
    F: Future<Output = PinResult<T>>,
    E: FnOnce() -> PinError,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}
