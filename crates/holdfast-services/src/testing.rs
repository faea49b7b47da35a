//! In-memory storage node and cluster peer.
//!
//! Both record every call they receive so tests can assert on the storage
//! side effects of intents, sweeps and syncs.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use holdfast_core::models::{ClusterStatusEntry, PeerStatus};
use holdfast_core::{PinError, PinResult};
use holdfast_ipfs::{AddedContent, ClusterApi, NamePublish, PublishedName, StorageBackend};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A storage node that keeps its pin set in memory.
#[derive(Default)]
pub struct RecordingBackend {
    pins: Mutex<BTreeSet<String>>,
    sizes: Mutex<HashMap<String, u64>>,
    calls: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with `StorageBackend`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn pinned(&self) -> Vec<String> {
        lock(&self.pins).iter().cloned().collect()
    }

    /// Calls in order, as `"op:content_id"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn record(&self, op: &str, content_id: &str) -> PinResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PinError::StorageBackend("node unreachable".to_string()));
        }
        lock(&self.calls).push(format!("{}:{}", op, content_id));
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    async fn add_content(&self, data: Vec<u8>, _file_name: Option<&str>) -> PinResult<AddedContent> {
        let content_id = format!("QmAdded{}", lock(&self.sizes).len() + 1);
        self.record("add", &content_id)?;
        let size = data.len() as u64;
        lock(&self.sizes).insert(content_id.clone(), size);
        Ok(AddedContent { content_id, size })
    }

    async fn pin(&self, content_id: &str) -> PinResult<()> {
        self.record("pin", content_id)?;
        lock(&self.pins).insert(content_id.to_string());
        Ok(())
    }

    async fn unpin(&self, content_id: &str) -> PinResult<()> {
        self.record("unpin", content_id)?;
        lock(&self.pins).remove(content_id);
        Ok(())
    }

    async fn object_size(&self, content_id: &str) -> PinResult<u64> {
        self.record("size", content_id)?;
        lock(&self.sizes)
            .get(content_id)
            .copied()
            .ok_or_else(|| PinError::StorageBackend(format!("unknown object {}", content_id)))
    }

    async fn has_pin(&self, content_id: &str) -> PinResult<bool> {
        self.record("has_pin", content_id)?;
        Ok(lock(&self.pins).contains(content_id))
    }

    async fn publish_name(&self, request: &NamePublish) -> PinResult<PublishedName> {
        self.record("publish", &request.content_id)?;
        Ok(PublishedName {
            name: format!("k51{}", request.key),
            value: format!("/ipfs/{}", request.content_id),
        })
    }
}

/// A cluster peer with a scripted local view.
#[derive(Default)]
pub struct FakeCluster {
    local: Vec<(String, String)>,
    global: BTreeMap<String, Vec<PeerStatus>>,
    failing_recover: HashSet<String>,
    failing_remove: HashSet<String>,
    recovered: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    pinned: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one local status report. The same CID may be reported repeatedly.
    pub fn with_local(mut self, content_id: &str, status: &str) -> Self {
        self.local.push((content_id.to_string(), status.to_string()));
        self
    }

    pub fn with_global(mut self, content_id: &str, peers: &[(&str, &str)]) -> Self {
        let peers = peers
            .iter()
            .map(|(peer_id, status)| PeerStatus {
                peer_id: peer_id.to_string(),
                status: status.to_string(),
                error: None,
            })
            .collect();
        self.global.insert(content_id.to_string(), peers);
        self
    }

    pub fn failing_recover(mut self, content_id: &str) -> Self {
        self.failing_recover.insert(content_id.to_string());
        self
    }

    pub fn failing_remove(mut self, content_id: &str) -> Self {
        self.failing_remove.insert(content_id.to_string());
        self
    }

    pub fn recovered(&self) -> Vec<String> {
        lock(&self.recovered).clone()
    }

    pub fn removed(&self) -> Vec<String> {
        lock(&self.removed).clone()
    }

    pub fn pinned(&self) -> Vec<String> {
        lock(&self.pinned).clone()
    }

    fn local_entry(content_id: &str, status: &str) -> ClusterStatusEntry {
        ClusterStatusEntry::from_peers(
            content_id,
            vec![PeerStatus {
                peer_id: "local".to_string(),
                status: status.to_string(),
                error: None,
            }],
        )
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn local_status(&self, content_id: &str) -> PinResult<ClusterStatusEntry> {
        let peers = self
            .local
            .iter()
            .filter(|(cid, _)| cid == content_id)
            .map(|(_, status)| PeerStatus {
                peer_id: "local".to_string(),
                status: status.clone(),
                error: None,
            })
            .collect();
        Ok(ClusterStatusEntry::from_peers(content_id, peers))
    }

    async fn global_status(&self, content_id: &str) -> PinResult<ClusterStatusEntry> {
        let peers = self.global.get(content_id).cloned().unwrap_or_default();
        Ok(ClusterStatusEntry::from_peers(content_id, peers))
    }

    async fn all_local_statuses(&self) -> PinResult<Vec<ClusterStatusEntry>> {
        Ok(self
            .local
            .iter()
            .map(|(cid, status)| Self::local_entry(cid, status))
            .collect())
    }

    async fn recover_local(&self, content_id: &str) -> PinResult<ClusterStatusEntry> {
        if self.failing_recover.contains(content_id) {
            return Err(PinError::ClusterStatus(format!("recover {} refused", content_id)));
        }
        lock(&self.recovered).push(content_id.to_string());
        Ok(Self::local_entry(content_id, "pinning"))
    }

    async fn remove_pin(&self, content_id: &str) -> PinResult<()> {
        if self.failing_remove.contains(content_id) {
            return Err(PinError::ClusterPinRemoval {
                content_id: content_id.to_string(),
                reason: "not tracked by cluster".to_string(),
            });
        }
        lock(&self.removed).push(content_id.to_string());
        Ok(())
    }

    async fn pin(&self, content_id: &str) -> PinResult<()> {
        lock(&self.pinned).push(content_id.to_string());
        Ok(())
    }
}
