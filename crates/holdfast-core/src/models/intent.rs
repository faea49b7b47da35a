use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

use crate::constants::{
    IPFS_CLUSTER_PIN_QUEUE, IPFS_FILE_QUEUE, IPNS_ENTRY_QUEUE, PIN_EXCHANGE, PIN_REMOVAL_EXCHANGE,
};

/// Pin a content id on a network node (or, for [`LifecycleIntent::ClusterPin`], cluster-wide).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinIntent {
    pub content_id: String,
    pub network_name: String,
    pub user_name: String,
    pub hold_months: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnpinIntent {
    pub content_id: String,
    pub network_name: String,
    pub user_name: String,
    /// Retention date of the swept record when the garbage collector issued
    /// the intent; `None` for a removal the user asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
}

/// A file staged in the object store, waiting to be added to a network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddFileIntent {
    pub bucket: String,
    pub object_name: String,
    pub file_name: Option<String>,
    pub network_name: String,
    pub user_name: String,
    pub hold_months: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishNameIntent {
    pub content_id: String,
    pub network_name: String,
    pub user_name: String,
    pub key: String,
    pub lifetime: Duration,
    pub ttl: Duration,
    pub resolve: bool,
}

/// One pending action, carried by the queue until a worker consumes it.
///
/// Intents are self-contained: a worker never needs to consult the ledger to
/// perform the storage operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleIntent {
    Pin(PinIntent),
    ClusterPin(PinIntent),
    Unpin(UnpinIntent),
    AddFile(AddFileIntent),
    PublishName(PublishNameIntent),
}

/// Where an intent goes by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Queue(&'static str),
    Exchange(&'static str),
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Route::Queue(name) => write!(f, "queue:{}", name),
            Route::Exchange(name) => write!(f, "exchange:{}", name),
        }
    }
}

impl LifecycleIntent {
    /// Pin and removal events fan out through exchanges; everything else is
    /// delivered to a single queue.
    pub fn route(&self) -> Route {
        match self {
            LifecycleIntent::Pin(_) => Route::Exchange(PIN_EXCHANGE),
            LifecycleIntent::ClusterPin(_) => Route::Queue(IPFS_CLUSTER_PIN_QUEUE),
            LifecycleIntent::Unpin(_) => Route::Exchange(PIN_REMOVAL_EXCHANGE),
            LifecycleIntent::AddFile(_) => Route::Queue(IPFS_FILE_QUEUE),
            LifecycleIntent::PublishName(_) => Route::Queue(IPNS_ENTRY_QUEUE),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleIntent::Pin(_) => "pin",
            LifecycleIntent::ClusterPin(_) => "cluster_pin",
            LifecycleIntent::Unpin(_) => "unpin",
            LifecycleIntent::AddFile(_) => "add_file",
            LifecycleIntent::PublishName(_) => "publish_name",
        }
    }

    /// Content id the intent refers to. Staged files do not have one yet.
    pub fn content_id(&self) -> Option<&str> {
        match self {
            LifecycleIntent::Pin(p) | LifecycleIntent::ClusterPin(p) => Some(&p.content_id),
            LifecycleIntent::Unpin(u) => Some(&u.content_id),
            LifecycleIntent::AddFile(_) => None,
            LifecycleIntent::PublishName(n) => Some(&n.content_id),
        }
    }

    pub fn network_name(&self) -> &str {
        match self {
            LifecycleIntent::Pin(p) | LifecycleIntent::ClusterPin(p) => &p.network_name,
            LifecycleIntent::Unpin(u) => &u.network_name,
            LifecycleIntent::AddFile(a) => &a.network_name,
            LifecycleIntent::PublishName(n) => &n.network_name,
        }
    }

    pub fn user_name(&self) -> &str {
        match self {
            LifecycleIntent::Pin(p) | LifecycleIntent::ClusterPin(p) => &p.user_name,
            LifecycleIntent::Unpin(u) => &u.user_name,
            LifecycleIntent::AddFile(a) => &a.user_name,
            LifecycleIntent::PublishName(n) => &n.user_name,
        }
    }
}

impl Display for LifecycleIntent {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.content_id() {
            Some(cid) => write!(f, "{}({} on {})", self.kind(), cid, self.network_name()),
            None => write!(f, "{}(on {})", self.kind(), self.network_name()),
        }
    }
}
