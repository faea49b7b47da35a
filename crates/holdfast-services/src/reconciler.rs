//! Cluster Reconciler
//!
//! Compares what the local cluster peer believes about a CID with the
//! cluster-wide consensus and repairs local pins stuck in an error state.
//! Every operation is independent and safe to repeat.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use holdfast_core::models::{ClusterStatus, ClusterStatusEntry};
use holdfast_core::PinResult;
use holdfast_ipfs::ClusterApi;

#[derive(Clone)]
pub struct ClusterReconciler {
    cluster: Arc<dyn ClusterApi>,
}

impl ClusterReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Run [`sync_local_errors`](Self::sync_local_errors) every `period`.
    pub fn start(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sync_interval = interval(period);

            loop {
                sync_interval.tick().await;

                match self.sync_local_errors().await {
                    Ok(repaired) if repaired.is_empty() => {
                        tracing::debug!("Cluster sync found no local errors");
                    }
                    Ok(repaired) => {
                        tracing::info!(repaired = repaired.len(), "Cluster sync repaired local pins");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Cluster sync failed");
                    }
                }
            }
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn local_status(&self, content_id: &str) -> PinResult<ClusterStatusEntry> {
        self.cluster.local_status(content_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn global_status(&self, content_id: &str) -> PinResult<ClusterStatusEntry> {
        self.cluster.global_status(content_id).await
    }

    /// Local status of every CID the local peer tracks.
    ///
    /// If the backend reports a CID more than once the worst status wins, so
    /// a CID in error is never masked by a healthy duplicate.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_all_local_statuses(&self) -> PinResult<BTreeMap<String, ClusterStatus>> {
        let entries = self.cluster.all_local_statuses().await?;
        let mut statuses: BTreeMap<String, ClusterStatus> = BTreeMap::new();
        for ClusterStatusEntry {
            content_id, status, ..
        } in entries
        {
            statuses
                .entry(content_id)
                .and_modify(|seen| *seen = ClusterStatus::aggregate([*seen, status]))
                .or_insert(status);
        }
        tracing::debug!(tracked = statuses.len(), "Fetched local cluster statuses");
        Ok(statuses)
    }

    /// Re-trigger pinning of every local CID in `pin_error` or an unexpected
    /// state. Each CID is repaired at most once per call. Returns the CIDs
    /// whose repair was accepted; a CID whose repair fails is logged and
    /// skipped.
    #[tracing::instrument(skip(self))]
    pub async fn sync_local_errors(&self) -> PinResult<Vec<String>> {
        let entries = self.cluster.all_local_statuses().await?;

        let broken: BTreeSet<String> = entries
            .into_iter()
            .filter(|entry| entry.status.needs_repair())
            .map(|entry| entry.content_id)
            .collect();

        let mut repaired = Vec::with_capacity(broken.len());
        let mut failed = 0usize;
        for content_id in broken {
            match self.cluster.recover_local(&content_id).await {
                Ok(entry) => {
                    tracing::info!(
                        content_id = %content_id,
                        status = %entry.status,
                        "Local pin repair triggered"
                    );
                    repaired.push(content_id);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(error = %e, content_id = %content_id, "Local pin repair failed");
                }
            }
        }

        if failed > 0 {
            tracing::warn!(failed, repaired = repaired.len(), "Some local pins could not be repaired");
        }
        Ok(repaired)
    }

    /// Stop tracking `content_id` anywhere in the cluster.
    #[tracing::instrument(skip(self))]
    pub async fn remove_pin(&self, content_id: &str) -> PinResult<()> {
        self.cluster.remove_pin(content_id).await?;
        tracing::info!(content_id = %content_id, "Pin removed from cluster");
        Ok(())
    }
}
