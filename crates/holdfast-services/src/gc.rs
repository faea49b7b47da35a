use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use holdfast_core::models::{LifecycleIntent, UnpinIntent, UploadRecord};
use holdfast_core::{Clock, PinResult};
use holdfast_db::UploadLedger;
use holdfast_queue::JobQueueGateway;

/// Expires ledger records whose hold time has elapsed and queues the
/// matching unpin for each.
///
/// The ledger delete commits before the unpin is published. If the publish
/// then fails the record is gone but the content may still be pinned; that
/// gap is logged at error level and left to the cluster reconciler.
#[derive(Clone)]
pub struct GarbageCollector {
    ledger: Arc<dyn UploadLedger>,
    gateway: JobQueueGateway,
    clock: Arc<dyn Clock>,
}

impl GarbageCollector {
    pub fn new(ledger: Arc<dyn UploadLedger>, gateway: JobQueueGateway, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            gateway,
            clock,
        }
    }

    /// Run [`sweep`](Self::sweep) every `period`. Returns a JoinHandle for
    /// graceful shutdown.
    pub fn start(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(period);

            loop {
                sweep_interval.tick().await;

                tracing::info!("Starting scheduled sweep of expired uploads");

                if let Err(e) = self.sweep().await {
                    tracing::error!(error = %e, "Garbage collection sweep failed");
                }
            }
        })
    }

    /// Delete every expired record and publish one unpin per deleted record.
    /// Returns the deleted records. A failed publish does not stop the sweep.
    #[tracing::instrument(skip(self), fields(gc.operation = "sweep"))]
    pub async fn sweep(&self) -> PinResult<Vec<UploadRecord>> {
        let now = self.clock.now();
        let expired = self.ledger.sweep_expired(now).await?;

        let mut unpublished = 0usize;
        for record in &expired {
            let intent = LifecycleIntent::Unpin(UnpinIntent {
                content_id: record.content_id.clone(),
                network_name: record.network_name.clone(),
                user_name: record.user_name.clone(),
                expired_at: Some(record.garbage_collect_at),
            });

            match self.gateway.dispatch(&intent).await {
                Ok(()) => {
                    tracing::debug!(
                        content_id = %record.content_id,
                        network = %record.network_name,
                        user = %record.user_name,
                        garbage_collect_at = %record.garbage_collect_at,
                        "Unpin queued for expired upload"
                    );
                }
                Err(e) => {
                    unpublished += 1;
                    tracing::error!(
                        error = %e,
                        content_id = %record.content_id,
                        network = %record.network_name,
                        user = %record.user_name,
                        "Upload expired from ledger but unpin was not queued; content may remain pinned until reconciled"
                    );
                }
            }
        }

        tracing::info!(
            expired = expired.len(),
            unpublished,
            now = %now,
            "Garbage collection sweep completed"
        );

        Ok(expired)
    }
}
