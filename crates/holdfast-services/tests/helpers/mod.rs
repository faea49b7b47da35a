//! Test helpers: wire the services together over in-memory stores.
//!
//! Run from workspace root: `cargo test -p holdfast-services`. The Postgres
//! tests need Docker and are ignored by default:
//! `cargo test -p holdfast-services -- --ignored`.

#![allow(dead_code)]

pub mod postgres;

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use holdfast_core::ManualClock;
use holdfast_db::MemoryUploadLedger;
use holdfast_ipfs::BackendRouter;
use holdfast_queue::{ConsumerConfig, IntentConsumer, JobQueueGateway, MemoryBroker, Outcome};
use holdfast_services::testing::{FakeCluster, RecordingBackend};
use holdfast_services::{
    ClusterReconciler, GarbageCollector, IntentProcessor, MemoryBlobStore, PinService,
    StaticAccessGate, Staging,
};

/// A well-formed CIDv0.
pub const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 31, 9, 30, 0).unwrap()
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryUploadLedger>,
    pub broker: MemoryBroker,
    pub gateway: JobQueueGateway,
    pub public: Arc<RecordingBackend>,
    pub acme: Arc<RecordingBackend>,
    pub cluster: Arc<FakeCluster>,
    pub blobs: Arc<MemoryBlobStore>,
    pub gc: GarbageCollector,
    pub reconciler: ClusterReconciler,
    pub processor: IntentProcessor,
    pub service: PinService,
    consumer_id: Uuid,
}

pub fn harness() -> Harness {
    harness_with_cluster(FakeCluster::new())
}

pub fn harness_with_cluster(cluster: FakeCluster) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let ledger = Arc::new(MemoryUploadLedger::new(clock.clone()));
    let broker = MemoryBroker::with_default_topology();
    let gateway = JobQueueGateway::new(Arc::new(broker.clone()), Duration::from_secs(2));
    let public = Arc::new(RecordingBackend::new());
    let acme = Arc::new(RecordingBackend::new());
    let cluster = Arc::new(cluster);
    let blobs = Arc::new(MemoryBlobStore::new());

    let router = BackendRouter::new(public.clone()).with_network("acme", acme.clone());
    let reconciler = ClusterReconciler::new(cluster.clone());
    let gc = GarbageCollector::new(ledger.clone(), gateway.clone(), clock.clone());
    let processor = IntentProcessor::new(
        router.clone(),
        cluster.clone(),
        ledger.clone(),
        Some(blobs.clone()),
    );
    let service = PinService::new(
        Arc::new(StaticAccessGate::new().allow("acme", "alice")),
        gateway.clone(),
        ledger.clone(),
        router,
        reconciler.clone(),
        Some(Staging {
            store: blobs.clone(),
            bucket: "staging".to_string(),
        }),
        "admin".to_string(),
        120,
    );

    Harness {
        clock,
        ledger,
        broker,
        gateway,
        public,
        acme,
        cluster,
        blobs,
        gc,
        reconciler,
        processor,
        service,
        consumer_id: Uuid::new_v4(),
    }
}

impl Harness {
    /// Process queued intents until every queue is empty. Returns the outcomes.
    pub async fn drain(&self) -> Vec<Outcome> {
        let config = ConsumerConfig::default();
        let mut outcomes = Vec::new();
        while let Some(outcome) =
            IntentConsumer::run_once(&self.broker, &self.processor, &config, self.consumer_id)
                .await
                .expect("consumer step")
        {
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(chrono::Duration::days(days));
    }
}
