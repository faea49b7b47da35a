//! Worker side of the queue: performs the storage operation an intent
//! describes, then records the outcome in the ledger.
//!
//! Delivery is at-least-once, so every step tolerates replay: node pins and
//! unpins are idempotent, and the ledger write falls back to a renewal when
//! the record already exists.

use async_trait::async_trait;
use std::sync::Arc;

use holdfast_core::models::{
    AddFileIntent, LifecycleIntent, NewUpload, PinIntent, PublishNameIntent, UnpinIntent,
};
use holdfast_core::{PinError, PinResult, TaskError};
use holdfast_db::UploadLedger;
use holdfast_ipfs::{BackendRouter, ClusterApi, NamePublish};
use holdfast_queue::IntentHandler;

use crate::blob::BlobStore;

pub struct IntentProcessor {
    router: BackendRouter,
    cluster: Arc<dyn ClusterApi>,
    ledger: Arc<dyn UploadLedger>,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl IntentProcessor {
    pub fn new(
        router: BackendRouter,
        cluster: Arc<dyn ClusterApi>,
        ledger: Arc<dyn UploadLedger>,
        blobs: Option<Arc<dyn BlobStore>>,
    ) -> Self {
        Self {
            router,
            cluster,
            ledger,
            blobs,
        }
    }

    pub async fn apply(&self, intent: &LifecycleIntent) -> PinResult<()> {
        match intent {
            LifecycleIntent::Pin(pin) => self.pin(pin).await,
            LifecycleIntent::ClusterPin(pin) => self.cluster_pin(pin).await,
            LifecycleIntent::Unpin(unpin) => self.unpin(unpin).await,
            LifecycleIntent::AddFile(add) => self.add_file(add).await,
            LifecycleIntent::PublishName(publish) => self.publish_name(publish).await,
        }
    }

    /// Create the record, or renew it if a previous delivery already did.
    async fn record(&self, upload: NewUpload) -> PinResult<()> {
        let (content_id, network, user, hold) = (
            upload.content_id.clone(),
            upload.network_name.clone(),
            upload.user_name.clone(),
            upload.hold_months,
        );
        match self.ledger.create(upload).await {
            Ok(record) => {
                tracing::debug!(
                    content_id = %content_id,
                    network = %network,
                    user = %user,
                    garbage_collect_at = %record.garbage_collect_at,
                    "Upload recorded"
                );
                Ok(())
            }
            Err(PinError::DuplicateRecord { .. }) => {
                let record = self.ledger.renew(&content_id, &network, &user, hold).await?;
                tracing::debug!(
                    content_id = %content_id,
                    network = %network,
                    user = %user,
                    garbage_collect_at = %record.garbage_collect_at,
                    "Upload renewed"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self, pin), fields(content_id = %pin.content_id, network = %pin.network_name))]
    async fn pin(&self, pin: &PinIntent) -> PinResult<()> {
        let backend = self.router.backend_for(&pin.network_name)?;
        backend.pin(&pin.content_id).await?;
        self.record(NewUpload::pin(
            &pin.content_id,
            &pin.network_name,
            &pin.user_name,
            pin.hold_months,
        ))
        .await
    }

    #[tracing::instrument(skip(self, pin), fields(content_id = %pin.content_id))]
    async fn cluster_pin(&self, pin: &PinIntent) -> PinResult<()> {
        self.cluster.pin(&pin.content_id).await?;
        self.record(NewUpload::pin(
            &pin.content_id,
            &pin.network_name,
            &pin.user_name,
            pin.hold_months,
        ))
        .await
    }

    /// Unpin from the network's node unless a ledger record still commits to
    /// holding the content there. For a user's own removal only other users'
    /// records count. For an expiry every record counts: the swept record is
    /// gone, so any match was created or renewed after the sweep. The ledger is
    /// left alone; only the garbage collector deletes records.
    #[tracing::instrument(skip(self, unpin), fields(content_id = %unpin.content_id, network = %unpin.network_name))]
    async fn unpin(&self, unpin: &UnpinIntent) -> PinResult<()> {
        let holders: Vec<String> = self
            .ledger
            .find_by_content(&unpin.content_id)
            .await?
            .into_iter()
            .filter(|r| r.network_name == unpin.network_name)
            .filter(|r| unpin.expired_at.is_some() || r.user_name != unpin.user_name)
            .map(|r| r.user_name)
            .collect();
        if !holders.is_empty() {
            tracing::info!(
                holders = ?holders,
                expired_at = ?unpin.expired_at,
                "Content still held, keeping pin"
            );
            return Ok(());
        }

        let backend = self.router.backend_for(&unpin.network_name)?;
        backend.unpin(&unpin.content_id).await?;
        tracing::info!("Content unpinned");
        Ok(())
    }

    #[tracing::instrument(skip(self, add), fields(bucket = %add.bucket, object = %add.object_name, network = %add.network_name))]
    async fn add_file(&self, add: &AddFileIntent) -> PinResult<()> {
        let blobs = self
            .blobs
            .as_ref()
            .ok_or_else(|| PinError::validation("no blob store configured for file uploads"))?;
        let backend = self.router.backend_for(&add.network_name)?;

        let data = blobs.get(&add.bucket, &add.object_name).await?;
        let added = backend
            .add_content(data.to_vec(), add.file_name.as_deref())
            .await?;
        backend.pin(&added.content_id).await?;

        self.record(NewUpload::file(
            &added.content_id,
            &add.network_name,
            &add.user_name,
            add.file_name.clone(),
            add.hold_months,
        ))
        .await?;

        tracing::info!(content_id = %added.content_id, size = added.size, "File added to network");

        // The file is safely pinned; a leftover staged copy is only wasted space.
        if let Err(e) = blobs.delete(&add.bucket, &add.object_name).await {
            tracing::warn!(error = %e, "Failed to delete staged blob");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, publish), fields(content_id = %publish.content_id, network = %publish.network_name, key = %publish.key))]
    async fn publish_name(&self, publish: &PublishNameIntent) -> PinResult<()> {
        let backend = self.router.backend_for(&publish.network_name)?;
        let published = backend
            .publish_name(&NamePublish {
                content_id: publish.content_id.clone(),
                key: publish.key.clone(),
                lifetime: publish.lifetime,
                ttl: publish.ttl,
                resolve: publish.resolve,
            })
            .await?;
        tracing::info!(name = %published.name, value = %published.value, "IPNS record published");
        Ok(())
    }
}

#[async_trait]
impl IntentHandler for IntentProcessor {
    async fn handle(&self, intent: LifecycleIntent) -> Result<(), TaskError> {
        self.apply(&intent).await.map_err(TaskError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::testing::{FakeCluster, RecordingBackend};
    use bytes::Bytes;
    use holdfast_core::SystemClock;
    use holdfast_db::MemoryUploadLedger;
    use holdfast_ipfs::StorageBackend;
    use std::time::Duration;

    struct Fixture {
        public: Arc<RecordingBackend>,
        acme: Arc<RecordingBackend>,
        cluster: Arc<FakeCluster>,
        ledger: Arc<MemoryUploadLedger>,
        blobs: Arc<MemoryBlobStore>,
        processor: IntentProcessor,
    }

    fn fixture() -> Fixture {
        let public = Arc::new(RecordingBackend::new());
        let acme = Arc::new(RecordingBackend::new());
        let cluster = Arc::new(FakeCluster::new());
        let ledger = Arc::new(MemoryUploadLedger::new(Arc::new(SystemClock)));
        let blobs = Arc::new(MemoryBlobStore::new());
        let router = BackendRouter::new(public.clone()).with_network("acme", acme.clone());
        let processor = IntentProcessor::new(
            router,
            cluster.clone(),
            ledger.clone(),
            Some(blobs.clone()),
        );
        Fixture {
            public,
            acme,
            cluster,
            ledger,
            blobs,
            processor,
        }
    }

    fn pin(cid: &str, network: &str, user: &str, hold: i64) -> LifecycleIntent {
        LifecycleIntent::Pin(PinIntent {
            content_id: cid.to_string(),
            network_name: network.to_string(),
            user_name: user.to_string(),
            hold_months: hold,
        })
    }

    fn unpin(cid: &str, network: &str, user: &str) -> LifecycleIntent {
        LifecycleIntent::Unpin(UnpinIntent {
            content_id: cid.to_string(),
            network_name: network.to_string(),
            user_name: user.to_string(),
            expired_at: None,
        })
    }

    #[tokio::test]
    async fn test_pin_routes_to_network_and_records_upload() {
        let f = fixture();
        f.processor.handle(pin("Qm1", "acme", "alice", 2)).await.unwrap();

        assert_eq!(f.acme.pinned(), vec!["Qm1".to_string()]);
        assert!(f.public.pinned().is_empty());
        let record = f
            .ledger
            .find_by_content_network_user("Qm1", "acme", "alice")
            .await
            .unwrap();
        assert_eq!(record.hold_months, 2);
    }

    #[tokio::test]
    async fn test_redelivered_pin_renews_instead_of_failing() {
        let f = fixture();
        f.processor.handle(pin("Qm1", "public", "alice", 1)).await.unwrap();
        f.processor.handle(pin("Qm1", "public", "alice", 6)).await.unwrap();

        let records = f.ledger.find_by_content("Qm1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hold_months, 6);
    }

    #[tokio::test]
    async fn test_unknown_network_is_recoverable_backend_error() {
        let f = fixture();
        let err = f
            .processor
            .handle(pin("Qm1", "nowhere", "alice", 1))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(f.ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_hold_is_unrecoverable() {
        let f = fixture();
        let err = f
            .processor
            .handle(pin("Qm1", "public", "alice", -3))
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_unpin_keeps_content_held_by_another_user() {
        let f = fixture();
        f.processor.handle(pin("Qm1", "public", "alice", 1)).await.unwrap();
        f.processor.handle(pin("Qm1", "public", "bob", 1)).await.unwrap();

        f.processor.handle(unpin("Qm1", "public", "alice")).await.unwrap();
        assert_eq!(f.public.pinned(), vec!["Qm1".to_string()]);
    }

    #[tokio::test]
    async fn test_expiry_unpin_keeps_content_repinned_by_same_user() {
        let f = fixture();
        f.processor.handle(pin("Qm1", "public", "alice", 6)).await.unwrap();

        let expired = LifecycleIntent::Unpin(UnpinIntent {
            content_id: "Qm1".to_string(),
            network_name: "public".to_string(),
            user_name: "alice".to_string(),
            expired_at: Some(chrono::Utc::now() - chrono::Duration::days(5)),
        });
        f.processor.handle(expired).await.unwrap();
        assert_eq!(f.public.pinned(), vec!["Qm1".to_string()]);

        // A removal alice asks for herself ignores her own record.
        f.processor.handle(unpin("Qm1", "public", "alice")).await.unwrap();
        assert!(f.public.pinned().is_empty());
    }

    #[tokio::test]
    async fn test_unpin_twice_is_harmless() {
        let f = fixture();
        f.public.pin("Qm1").await.unwrap();

        f.processor.handle(unpin("Qm1", "public", "alice")).await.unwrap();
        f.processor.handle(unpin("Qm1", "public", "alice")).await.unwrap();
        assert!(f.public.pinned().is_empty());
    }

    #[tokio::test]
    async fn test_cluster_pin() {
        let f = fixture();
        let intent = match pin("Qm1", "public", "alice", 1) {
            LifecycleIntent::Pin(p) => LifecycleIntent::ClusterPin(p),
            _ => unreachable!(),
        };
        f.processor.handle(intent).await.unwrap();

        assert_eq!(f.cluster.pinned(), vec!["Qm1".to_string()]);
        assert!(f.public.pinned().is_empty());
        assert_eq!(f.ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_file_pins_records_and_removes_staged_blob() {
        let f = fixture();
        f.blobs
            .put("uploads", "alice/report.pdf", Bytes::from_static(b"%PDF-1.7"))
            .await
            .unwrap();

        f.processor
            .handle(LifecycleIntent::AddFile(AddFileIntent {
                bucket: "uploads".to_string(),
                object_name: "alice/report.pdf".to_string(),
                file_name: Some("report.pdf".to_string()),
                network_name: "public".to_string(),
                user_name: "alice".to_string(),
                hold_months: 1,
            }))
            .await
            .unwrap();

        let pinned = f.public.pinned();
        assert_eq!(pinned.len(), 1);
        let record = f
            .ledger
            .find_by_content_network_user(&pinned[0], "public", "alice")
            .await
            .unwrap();
        assert_eq!(record.kind, holdfast_core::models::UploadKind::File);
        assert_eq!(record.name.as_deref(), Some("report.pdf"));
        assert!(!f.blobs.contains("uploads", "alice/report.pdf"));
    }

    #[tokio::test]
    async fn test_add_file_with_missing_blob_is_unrecoverable() {
        let f = fixture();
        let err = f
            .processor
            .handle(LifecycleIntent::AddFile(AddFileIntent {
                bucket: "uploads".to_string(),
                object_name: "gone".to_string(),
                file_name: None,
                network_name: "public".to_string(),
                user_name: "alice".to_string(),
                hold_months: 1,
            }))
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_publish_name() {
        let f = fixture();
        f.processor
            .handle(LifecycleIntent::PublishName(PublishNameIntent {
                content_id: "Qm1".to_string(),
                network_name: "acme".to_string(),
                user_name: "alice".to_string(),
                key: "self".to_string(),
                lifetime: Duration::from_secs(86_400),
                ttl: Duration::from_secs(3_600),
                resolve: true,
            }))
            .await
            .unwrap();
        assert_eq!(f.acme.calls(), vec!["publish:Qm1".to_string()]);
    }

    #[tokio::test]
    async fn test_backend_outage_is_recoverable() {
        let f = fixture();
        f.public.set_unavailable(true);
        let err = f
            .processor
            .handle(pin("Qm1", "public", "alice", 1))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());

        // Nothing was recorded for a pin that never happened.
        assert!(f.ledger.is_empty().await);
    }
}
