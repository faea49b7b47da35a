use std::collections::HashMap;
use std::sync::Arc;

use holdfast_core::config::IpfsConfig;
use holdfast_core::constants::PUBLIC_NETWORK;
use holdfast_core::{PinError, PinResult};

use crate::node::IpfsNodeClient;
use crate::traits::StorageBackend;

/// Maps network names to the node that serves them.
#[derive(Clone)]
pub struct BackendRouter {
    public: Arc<dyn StorageBackend>,
    private: HashMap<String, Arc<dyn StorageBackend>>,
}

impl BackendRouter {
    pub fn new(public: Arc<dyn StorageBackend>) -> Self {
        Self {
            public,
            private: HashMap::new(),
        }
    }

    /// Build HTTP clients for the public node and every configured private network.
    pub fn from_config(config: &IpfsConfig) -> PinResult<Self> {
        let timeout = config.request_timeout();
        let mut router = Self::new(Arc::new(IpfsNodeClient::new(&config.api_url, timeout)?));
        for (name, url) in &config.private_networks {
            router = router.with_network(name, Arc::new(IpfsNodeClient::new(url, timeout)?));
            tracing::debug!(network = %name, url = %url, "Private network backend registered");
        }
        Ok(router)
    }

    pub fn with_network(mut self, name: &str, backend: Arc<dyn StorageBackend>) -> Self {
        self.private.insert(name.to_string(), backend);
        self
    }

    pub fn backend_for(&self, network_name: &str) -> PinResult<Arc<dyn StorageBackend>> {
        if network_name == PUBLIC_NETWORK {
            return Ok(self.public.clone());
        }
        self.private.get(network_name).cloned().ok_or_else(|| {
            PinError::StorageBackend(format!(
                "no storage backend configured for network {}",
                network_name
            ))
        })
    }

    pub fn networks(&self) -> Vec<String> {
        let mut names: Vec<String> = std::iter::once(PUBLIC_NETWORK.to_string())
            .chain(self.private.keys().cloned())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config() -> IpfsConfig {
        let mut private_networks = BTreeMap::new();
        private_networks.insert("acme".to_string(), "http://10.0.0.5:5001".to_string());
        IpfsConfig {
            private_networks,
            ..IpfsConfig::default()
        }
    }

    #[test]
    fn test_routes_known_networks() {
        let router = BackendRouter::from_config(&config()).unwrap();
        assert!(router.backend_for(PUBLIC_NETWORK).is_ok());
        assert!(router.backend_for("acme").is_ok());
        assert_eq!(router.networks(), vec!["acme".to_string(), "public".to_string()]);
    }

    #[test]
    fn test_unknown_network_is_backend_error() {
        let router = BackendRouter::from_config(&config()).unwrap();
        assert!(matches!(
            router.backend_for("unknown"),
            Err(PinError::StorageBackend(_))
        ));
    }
}
