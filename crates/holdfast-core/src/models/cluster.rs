use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Pin status of a content id, either on the local cluster peer or
/// cluster-wide.
///
/// Valid transitions: `queued -> pinning -> {pinned | pin_error}`,
/// `pin_error -> pinning` (repair), `pin_error -> unpinned` and
/// `pinned -> unpinned` (removal). Anything the backend reports outside this
/// model is [`ClusterStatus::UnexpectedState`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Queued,
    Pinning,
    Pinned,
    PinError,
    Unpinned,
    UnexpectedState,
}

impl ClusterStatus {
    /// Classify a status string reported by the cluster API.
    pub fn from_observed(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pin_queued" | "queued" => ClusterStatus::Queued,
            "pinning" => ClusterStatus::Pinning,
            "pinned" => ClusterStatus::Pinned,
            "pin_error" => ClusterStatus::PinError,
            "unpinned" => ClusterStatus::Unpinned,
            _ => ClusterStatus::UnexpectedState,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Queued => "queued",
            ClusterStatus::Pinning => "pinning",
            ClusterStatus::Pinned => "pinned",
            ClusterStatus::PinError => "pin_error",
            ClusterStatus::Unpinned => "unpinned",
            ClusterStatus::UnexpectedState => "unexpected_state",
        }
    }

    /// Error and unexpected states share one repair path.
    pub fn needs_repair(&self) -> bool {
        matches!(
            self,
            ClusterStatus::PinError | ClusterStatus::UnexpectedState
        )
    }

    /// Fold per-peer statuses into one cluster-wide status.
    ///
    /// Any error wins, then any unexpected state; a CID is only pinned when
    /// every peer says so. No peers means nothing tracks the CID.
    pub fn aggregate<I>(statuses: I) -> ClusterStatus
    where
        I: IntoIterator<Item = ClusterStatus>,
    {
        let seen: Vec<ClusterStatus> = statuses.into_iter().collect();
        if seen.is_empty() {
            return ClusterStatus::Unpinned;
        }
        let any = |s: ClusterStatus| seen.iter().any(|x| *x == s);
        let all = |s: ClusterStatus| seen.iter().all(|x| *x == s);

        if any(ClusterStatus::PinError) {
            ClusterStatus::PinError
        } else if any(ClusterStatus::UnexpectedState) {
            ClusterStatus::UnexpectedState
        } else if all(ClusterStatus::Pinned) {
            ClusterStatus::Pinned
        } else if all(ClusterStatus::Unpinned) {
            ClusterStatus::Unpinned
        } else if any(ClusterStatus::Queued) && !any(ClusterStatus::Pinning) {
            ClusterStatus::Queued
        } else {
            ClusterStatus::Pinning
        }
    }
}

impl Display for ClusterStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

const REMOTE_STATUS: &str = "remote";

/// Status of one CID as observed at one point in time. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterStatusEntry {
    pub content_id: String,
    pub status: ClusterStatus,
    /// Raw per-peer status strings as reported by the backend.
    pub peers: Vec<PeerStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerStatus {
    pub peer_id: String,
    pub status: String,
    pub error: Option<String>,
}

impl ClusterStatusEntry {
    /// Peers reporting `remote` do not hold an allocation for the CID and are
    /// left out of the cluster-wide status.
    pub fn from_peers(content_id: impl Into<String>, peers: Vec<PeerStatus>) -> Self {
        let status = ClusterStatus::aggregate(
            peers
                .iter()
                .filter(|p| !p.status.eq_ignore_ascii_case(REMOTE_STATUS))
                .map(|p| ClusterStatus::from_observed(&p.status)),
        );
        Self {
            content_id: content_id.into(),
            status,
            peers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_strings_map_to_closed_set() {
        assert_eq!(ClusterStatus::from_observed("pinned"), ClusterStatus::Pinned);
        assert_eq!(ClusterStatus::from_observed("PIN_ERROR"), ClusterStatus::PinError);
        assert_eq!(ClusterStatus::from_observed("pin_queued"), ClusterStatus::Queued);
        assert_eq!(
            ClusterStatus::from_observed("unpin_error"),
            ClusterStatus::UnexpectedState
        );
        assert_eq!(
            ClusterStatus::from_observed("cluster_error"),
            ClusterStatus::UnexpectedState
        );
    }

    #[test]
    fn repair_class_is_error_union_unexpected() {
        assert!(ClusterStatus::PinError.needs_repair());
        assert!(ClusterStatus::UnexpectedState.needs_repair());
        assert!(!ClusterStatus::Pinned.needs_repair());
        assert!(!ClusterStatus::Pinning.needs_repair());
    }

    #[test]
    fn aggregate_prefers_errors() {
        use ClusterStatus::*;
        assert_eq!(ClusterStatus::aggregate([Pinned, PinError, Pinned]), PinError);
        assert_eq!(ClusterStatus::aggregate([Pinned, Pinned]), Pinned);
        assert_eq!(ClusterStatus::aggregate([Pinned, Pinning]), Pinning);
        assert_eq!(ClusterStatus::aggregate([Queued, Queued]), Queued);
        assert_eq!(ClusterStatus::aggregate(Vec::new()), Unpinned);
    }

    #[test]
    fn remote_peers_do_not_affect_entry_status() {
        let peer = |id: &str, status: &str| PeerStatus {
            peer_id: id.to_string(),
            status: status.to_string(),
            error: None,
        };
        let entry = ClusterStatusEntry::from_peers(
            "Qm123",
            vec![peer("a", "pinned"), peer("b", "remote")],
        );
        assert_eq!(entry.status, ClusterStatus::Pinned);
        assert_eq!(entry.peers.len(), 2);
    }
}
