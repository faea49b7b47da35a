//! Request path
//!
//! Everything a transport layer needs after authentication: validate input,
//! check network access, then either read the ledger or enqueue an intent.
//! Nothing here talks to a storage node on behalf of a write; writes are
//! always deferred to the intent processor.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

use holdfast_core::constants::PUBLIC_NETWORK;
use holdfast_core::models::{
    AddFileIntent, AddFileRequest, ClusterStatus, ClusterStatusEntry, LifecycleIntent, PinIntent,
    PinRequest, PublishNameIntent, PublishNameRequest, UnpinIntent, UploadRecord,
};
use holdfast_core::validation::{parse_duration, validate_content_id, validate_hold_months};
use holdfast_core::{PinError, PinResult};
use holdfast_db::UploadLedger;
use holdfast_ipfs::BackendRouter;
use holdfast_queue::JobQueueGateway;

use crate::access::{require_admin, AccessGate};
use crate::blob::BlobStore;
use crate::reconciler::ClusterReconciler;

/// Where file uploads are staged before a worker adds them.
#[derive(Clone)]
pub struct Staging {
    pub store: Arc<dyn BlobStore>,
    pub bucket: String,
}

#[derive(Clone)]
pub struct PinService {
    gate: Arc<dyn AccessGate>,
    gateway: JobQueueGateway,
    ledger: Arc<dyn UploadLedger>,
    router: BackendRouter,
    reconciler: ClusterReconciler,
    staging: Option<Staging>,
    admin_user: String,
    max_hold_months: i64,
}

impl PinService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gate: Arc<dyn AccessGate>,
        gateway: JobQueueGateway,
        ledger: Arc<dyn UploadLedger>,
        router: BackendRouter,
        reconciler: ClusterReconciler,
        staging: Option<Staging>,
        admin_user: String,
        max_hold_months: i64,
    ) -> Self {
        Self {
            gate,
            gateway,
            ledger,
            router,
            reconciler,
            staging,
            admin_user,
            max_hold_months,
        }
    }

    fn check_pin_request(&self, request: &PinRequest) -> PinResult<()> {
        request.check()?;
        validate_hold_months(request.hold_months, self.max_hold_months)
    }

    /// Queue a pin on the request's network.
    #[tracing::instrument(skip(self, request), fields(content_id = %request.content_id, network = %request.network_name))]
    pub async fn pin_content(&self, user_name: &str, request: &PinRequest) -> PinResult<()> {
        self.check_pin_request(request)?;
        self.gate.check_access(user_name, &request.network_name).await?;

        self.gateway
            .dispatch(&LifecycleIntent::Pin(PinIntent {
                content_id: request.content_id.clone(),
                network_name: request.network_name.clone(),
                user_name: user_name.to_string(),
                hold_months: request.hold_months,
            }))
            .await?;

        tracing::info!(user = %user_name, "Pin request sent to backend");
        Ok(())
    }

    /// Queue a cluster-wide pin. Cluster pins always belong to the public network.
    #[tracing::instrument(skip(self, request), fields(content_id = %request.content_id))]
    pub async fn pin_to_cluster(&self, user_name: &str, request: &PinRequest) -> PinResult<()> {
        self.check_pin_request(request)?;
        if request.network_name != PUBLIC_NETWORK {
            return Err(PinError::validation("cluster pins are only available on the public network"));
        }
        self.gate.check_access(user_name, PUBLIC_NETWORK).await?;

        self.gateway
            .dispatch(&LifecycleIntent::ClusterPin(PinIntent {
                content_id: request.content_id.clone(),
                network_name: PUBLIC_NETWORK.to_string(),
                user_name: user_name.to_string(),
                hold_months: request.hold_months,
            }))
            .await?;

        tracing::info!(user = %user_name, "Cluster pin request sent to backend");
        Ok(())
    }

    /// Queue an unpin of `content_id` from `network_name`.
    #[tracing::instrument(skip(self))]
    pub async fn remove_pin(&self, user_name: &str, content_id: &str, network_name: &str) -> PinResult<()> {
        validate_content_id(content_id)?;
        self.gate.check_access(user_name, network_name).await?;

        self.gateway
            .dispatch(&LifecycleIntent::Unpin(UnpinIntent {
                content_id: content_id.to_string(),
                network_name: network_name.to_string(),
                user_name: user_name.to_string(),
                expired_at: None,
            }))
            .await?;

        tracing::info!(user = %user_name, "Pin removal request sent to backend");
        Ok(())
    }

    /// Stage `data` in the blob store and queue it for addition. Returns the
    /// staged object name.
    #[tracing::instrument(skip(self, request, data), fields(network = %request.network_name, size = data.len()))]
    pub async fn add_file(&self, user_name: &str, request: &AddFileRequest, data: Bytes) -> PinResult<String> {
        request.check()?;
        validate_hold_months(request.hold_months, self.max_hold_months)?;
        self.gate.check_access(user_name, &request.network_name).await?;

        let staging = self
            .staging
            .as_ref()
            .ok_or_else(|| PinError::StorageBackend("file uploads are not configured".to_string()))?;
        let object_name = format!("{}/{}", user_name, uuid::Uuid::new_v4());
        staging.store.put(&staging.bucket, &object_name, data).await?;

        let dispatched = self
            .gateway
            .dispatch(&LifecycleIntent::AddFile(AddFileIntent {
                bucket: staging.bucket.clone(),
                object_name: object_name.clone(),
                file_name: request.file_name.clone(),
                network_name: request.network_name.clone(),
                user_name: user_name.to_string(),
                hold_months: request.hold_months,
            }))
            .await;
        if let Err(e) = dispatched {
            // No intent references the staged object, so nothing else will remove it.
            if let Err(delete_err) = staging.store.delete(&staging.bucket, &object_name).await {
                tracing::warn!(
                    error = %delete_err,
                    object = %object_name,
                    "Failed to delete staged blob after publish failure"
                );
            }
            return Err(e);
        }

        tracing::info!(user = %user_name, object = %object_name, "File add request sent to backend");
        Ok(object_name)
    }

    /// Queue an IPNS publication.
    #[tracing::instrument(skip(self, request), fields(content_id = %request.content_id, network = %request.network_name))]
    pub async fn publish_name(&self, user_name: &str, request: &PublishNameRequest) -> PinResult<()> {
        request.check()?;
        let lifetime = parse_duration(&request.lifetime)?;
        let ttl = parse_duration(&request.ttl)?;
        self.gate.check_access(user_name, &request.network_name).await?;

        self.gateway
            .dispatch(&LifecycleIntent::PublishName(PublishNameIntent {
                content_id: request.content_id.clone(),
                network_name: request.network_name.clone(),
                user_name: user_name.to_string(),
                key: request.key.clone(),
                lifetime,
                ttl,
                resolve: request.resolve,
            }))
            .await?;

        tracing::info!(user = %user_name, key = %request.key, "IPNS publish request sent to backend");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn uploads_for_network(&self, user_name: &str, network_name: &str) -> PinResult<Vec<UploadRecord>> {
        self.gate.check_access(user_name, network_name).await?;
        self.ledger.find_by_network(network_name).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn uploads_for_user(&self, user_name: &str) -> PinResult<Vec<UploadRecord>> {
        self.ledger.find_by_user(user_name).await
    }

    /// Cumulative size of `content_id` as reported by the network's node.
    #[tracing::instrument(skip(self))]
    pub async fn object_size(&self, user_name: &str, content_id: &str, network_name: &str) -> PinResult<u64> {
        validate_content_id(content_id)?;
        self.gate.check_access(user_name, network_name).await?;
        self.router.backend_for(network_name)?.object_size(content_id).await
    }

    /// Whether the network's node holds a pin for `content_id`. Admin only.
    #[tracing::instrument(skip(self))]
    pub async fn has_pin(&self, user_name: &str, content_id: &str, network_name: &str) -> PinResult<bool> {
        require_admin(user_name, &self.admin_user)?;
        validate_content_id(content_id)?;
        self.gate.check_access(user_name, network_name).await?;
        self.router.backend_for(network_name)?.has_pin(content_id).await
    }

    pub async fn cluster_local_status(&self, user_name: &str, content_id: &str) -> PinResult<ClusterStatusEntry> {
        require_admin(user_name, &self.admin_user)?;
        validate_content_id(content_id)?;
        self.reconciler.local_status(content_id).await
    }

    pub async fn cluster_global_status(&self, user_name: &str, content_id: &str) -> PinResult<ClusterStatusEntry> {
        require_admin(user_name, &self.admin_user)?;
        validate_content_id(content_id)?;
        self.reconciler.global_status(content_id).await
    }

    pub async fn cluster_local_statuses(&self, user_name: &str) -> PinResult<BTreeMap<String, ClusterStatus>> {
        require_admin(user_name, &self.admin_user)?;
        self.reconciler.fetch_all_local_statuses().await
    }

    pub async fn sync_cluster_errors(&self, user_name: &str) -> PinResult<Vec<String>> {
        require_admin(user_name, &self.admin_user)?;
        let repaired = self.reconciler.sync_local_errors().await?;
        tracing::info!(user = %user_name, repaired = repaired.len(), "Local cluster errors synced");
        Ok(repaired)
    }

    pub async fn remove_from_cluster(&self, user_name: &str, content_id: &str) -> PinResult<()> {
        require_admin(user_name, &self.admin_user)?;
        validate_content_id(content_id)?;
        self.reconciler.remove_pin(content_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::StaticAccessGate;
    use crate::blob::MemoryBlobStore;
    use crate::testing::{FakeCluster, RecordingBackend};
    use holdfast_core::constants::{
        IPFS_CLUSTER_PIN_QUEUE, IPFS_FILE_QUEUE, IPFS_PIN_QUEUE, IPFS_PIN_REMOVAL_QUEUE,
        IPNS_ENTRY_QUEUE,
    };
    use holdfast_core::SystemClock;
    use holdfast_db::MemoryUploadLedger;
    use holdfast_queue::MemoryBroker;
    use std::time::Duration;

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    struct Fixture {
        broker: MemoryBroker,
        blobs: Arc<MemoryBlobStore>,
        cluster: Arc<FakeCluster>,
        service: PinService,
    }

    fn fixture() -> Fixture {
        fixture_with_gate(Arc::new(StaticAccessGate::new().allow("acme", "alice")))
    }

    fn fixture_with_gate(gate: Arc<dyn AccessGate>) -> Fixture {
        let broker = MemoryBroker::with_default_topology();
        let gateway = JobQueueGateway::new(Arc::new(broker.clone()), Duration::from_secs(1));
        let ledger = Arc::new(MemoryUploadLedger::new(Arc::new(SystemClock)));
        let router = BackendRouter::new(Arc::new(RecordingBackend::new()))
            .with_network("acme", Arc::new(RecordingBackend::new()));
        let cluster = Arc::new(FakeCluster::new().with_local(CID, "pin_error"));
        let blobs = Arc::new(MemoryBlobStore::new());
        let service = PinService::new(
            gate,
            gateway,
            ledger,
            router,
            ClusterReconciler::new(cluster.clone()),
            Some(Staging {
                store: blobs.clone(),
                bucket: "staging".to_string(),
            }),
            "admin".to_string(),
            120,
        );
        Fixture {
            broker,
            blobs,
            cluster,
            service,
        }
    }

    #[tokio::test]
    async fn test_pin_content_goes_through_pin_exchange() {
        let f = fixture();
        f.service
            .pin_content("alice", &PinRequest::new(CID, "acme", 3))
            .await
            .unwrap();

        let intents = f.broker.intents(IPFS_PIN_QUEUE);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].user_name(), "alice");
        assert_eq!(intents[0].network_name(), "acme");
    }

    #[tokio::test]
    async fn test_access_checked_before_anything_is_queued() {
        let f = fixture();
        let err = f
            .service
            .pin_content("mallory", &PinRequest::new(CID, "acme", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, PinError::AccessDenied { .. }));
        assert_eq!(f.broker.pending_count(IPFS_PIN_QUEUE), 0);

        let err = f.service.uploads_for_network("mallory", "acme").await.unwrap_err();
        assert!(matches!(err, PinError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_validation_rejects_before_access_or_queue() {
        let f = fixture();
        for request in [
            PinRequest::new("nonsense", "public", 1),
            PinRequest::new(CID, "public", -1),
            PinRequest::new(CID, "public", 121),
        ] {
            let err = f.service.pin_content("alice", &request).await.unwrap_err();
            assert!(matches!(err, PinError::Validation(_)), "{:?}", request);
        }
        assert_eq!(f.broker.pending_count(IPFS_PIN_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_cluster_pin_and_removal_queues() {
        let f = fixture();
        f.service
            .pin_to_cluster("alice", &PinRequest::new(CID, PUBLIC_NETWORK, 1))
            .await
            .unwrap();
        f.service.remove_pin("alice", CID, "acme").await.unwrap();

        assert_eq!(f.broker.pending_count(IPFS_CLUSTER_PIN_QUEUE), 1);
        assert_eq!(f.broker.pending_count(IPFS_PIN_REMOVAL_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_broker_outage_surfaces_as_retryable() {
        use holdfast_core::ErrorMetadata;

        let f = fixture();
        f.broker.set_unavailable(true);
        let err = f
            .service
            .pin_content("alice", &PinRequest::new(CID, PUBLIC_NETWORK, 1))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.http_status_code() >= 500);
    }

    #[tokio::test]
    async fn test_add_file_stages_blob_and_queues_intent() {
        let f = fixture();
        let request = AddFileRequest {
            network_name: PUBLIC_NETWORK.to_string(),
            file_name: Some("notes.txt".to_string()),
            hold_months: 2,
        };
        let object_name = f
            .service
            .add_file("alice", &request, Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert!(object_name.starts_with("alice/"));
        assert!(f.blobs.contains("staging", &object_name));
        match &f.broker.intents(IPFS_FILE_QUEUE)[..] {
            [LifecycleIntent::AddFile(add)] => {
                assert_eq!(add.object_name, object_name);
                assert_eq!(add.bucket, "staging");
            }
            other => panic!("unexpected intents {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_add_file_publish_removes_staged_blob() {
        let f = fixture();
        f.broker.set_unavailable(true);
        let request = AddFileRequest {
            network_name: PUBLIC_NETWORK.to_string(),
            file_name: Some("notes.txt".to_string()),
            hold_months: 2,
        };
        let err = f
            .service
            .add_file("alice", &request, Bytes::from_static(b"hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, PinError::QueueInitialization(_)));
        assert!(f.blobs.is_empty());
        assert_eq!(f.broker.pending_count(IPFS_FILE_QUEUE), 0);
    }

    struct DenyAll;

    #[async_trait::async_trait]
    impl AccessGate for DenyAll {
        async fn check_access(&self, user_name: &str, network_name: &str) -> PinResult<()> {
            Err(PinError::AccessDenied {
                user: user_name.to_string(),
                network: network_name.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_cluster_pin_consults_access_gate() {
        let f = fixture_with_gate(Arc::new(DenyAll));
        let err = f
            .service
            .pin_to_cluster("alice", &PinRequest::new(CID, PUBLIC_NETWORK, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, PinError::AccessDenied { .. }));
        assert_eq!(f.broker.pending_count(IPFS_CLUSTER_PIN_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_publish_name_parses_durations() {
        let f = fixture();
        let mut request = PublishNameRequest {
            content_id: CID.to_string(),
            network_name: PUBLIC_NETWORK.to_string(),
            key: "self".to_string(),
            lifetime: "1h30m".to_string(),
            ttl: "90s".to_string(),
            resolve: false,
        };
        f.service.publish_name("alice", &request).await.unwrap();
        match &f.broker.intents(IPNS_ENTRY_QUEUE)[..] {
            [LifecycleIntent::PublishName(p)] => {
                assert_eq!(p.lifetime, Duration::from_secs(5_400));
                assert_eq!(p.ttl, Duration::from_secs(90));
            }
            other => panic!("unexpected intents {:?}", other),
        }

        request.ttl = "forever".to_string();
        assert!(matches!(
            f.service.publish_name("alice", &request).await,
            Err(PinError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cluster_operations_require_admin() {
        let f = fixture();
        assert!(matches!(
            f.service.sync_cluster_errors("alice").await,
            Err(PinError::AccessDenied { .. })
        ));
        assert!(f.cluster.recovered().is_empty());

        let repaired = f.service.sync_cluster_errors("admin").await.unwrap();
        assert_eq!(repaired, vec![CID.to_string()]);
        assert_eq!(
            f.service.cluster_local_status("admin", CID).await.unwrap().status,
            ClusterStatus::PinError
        );
    }
}
