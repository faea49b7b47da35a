//! Access Gate
//!
//! Every network-scoped ledger read and queue publish goes through
//! [`AccessGate::check_access`] first. The public network is open to every
//! authenticated user; a private network requires membership.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use holdfast_core::constants::PUBLIC_NETWORK;
use holdfast_core::{PinError, PinResult};
use holdfast_db::NetworkMemberRepository;

#[async_trait]
pub trait AccessGate: Send + Sync {
    /// `Ok(())` if `user_name` may act on `network_name`, `AccessDenied` otherwise.
    async fn check_access(&self, user_name: &str, network_name: &str) -> PinResult<()>;
}

fn denied(user_name: &str, network_name: &str) -> PinError {
    PinError::AccessDenied {
        user: user_name.to_string(),
        network: network_name.to_string(),
    }
}

/// Membership stored in the `network_members` table.
#[derive(Clone)]
pub struct PgAccessGate {
    members: NetworkMemberRepository,
}

impl PgAccessGate {
    pub fn new(members: NetworkMemberRepository) -> Self {
        Self { members }
    }
}

#[async_trait]
impl AccessGate for PgAccessGate {
    #[tracing::instrument(skip(self))]
    async fn check_access(&self, user_name: &str, network_name: &str) -> PinResult<()> {
        if network_name == PUBLIC_NETWORK {
            return Ok(());
        }
        if self.members.is_member(network_name, user_name).await? {
            Ok(())
        } else {
            tracing::debug!(user = %user_name, network = %network_name, "Private network access denied");
            Err(denied(user_name, network_name))
        }
    }
}

/// Fixed membership table, for tests and single-tenant deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessGate {
    members: HashMap<String, HashSet<String>>,
}

impl StaticAccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, network_name: &str, user_name: &str) -> Self {
        self.members
            .entry(network_name.to_string())
            .or_default()
            .insert(user_name.to_string());
        self
    }
}

#[async_trait]
impl AccessGate for StaticAccessGate {
    async fn check_access(&self, user_name: &str, network_name: &str) -> PinResult<()> {
        if network_name == PUBLIC_NETWORK {
            return Ok(());
        }
        match self.members.get(network_name) {
            Some(users) if users.contains(user_name) => Ok(()),
            _ => Err(denied(user_name, network_name)),
        }
    }
}

/// Cluster admin operations are reserved for one configured user.
pub fn require_admin(user_name: &str, admin_user: &str) -> PinResult<()> {
    if user_name == admin_user {
        Ok(())
    } else {
        Err(denied(user_name, "cluster"))
    }
}
