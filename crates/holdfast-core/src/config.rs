//! Configuration module
//!
//! Everything is read from the environment (after loading `.env` through
//! dotenvy). Only `DATABASE_URL` is required; every other setting has a
//! default suitable for a single-node deployment.

use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Common constants
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const QUEUE_OPERATION_TIMEOUT_SECS: u64 = 10;
const QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 300;
const QUEUE_MAX_WORKERS: usize = 4;
const QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const QUEUE_MAX_DELIVERIES: i32 = 5;
const IPFS_API_URL: &str = "http://127.0.0.1:5001";
const IPFS_CLUSTER_API_URL: &str = "http://127.0.0.1:9094";
const IPFS_REQUEST_TIMEOUT_SECS: u64 = 60;
const GC_INTERVAL_SECS: u64 = 3600;
const RECONCILE_INTERVAL_SECS: u64 = 900;
const ADMIN_USER: &str = "admin";
const MAX_HOLD_MONTHS: i64 = 120;

/// Object store holding files staged for `add_file` intents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobStoreConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
}

/// Broker and consumer settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    pub operation_timeout_seconds: u64,
    pub visibility_timeout_seconds: u64,
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub max_deliveries: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            operation_timeout_seconds: QUEUE_OPERATION_TIMEOUT_SECS,
            visibility_timeout_seconds: QUEUE_VISIBILITY_TIMEOUT_SECS,
            max_workers: QUEUE_MAX_WORKERS,
            poll_interval_ms: QUEUE_POLL_INTERVAL_MS,
            max_deliveries: QUEUE_MAX_DELIVERIES,
        }
    }
}

impl QueueConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }
}

/// Storage backend endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpfsConfig {
    /// Node API of the public network.
    pub api_url: String,
    pub cluster_api_url: String,
    /// Node API per private network name.
    pub private_networks: BTreeMap<String, String>,
    pub request_timeout_seconds: u64,
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            api_url: IPFS_API_URL.to_string(),
            cluster_api_url: IPFS_CLUSTER_API_URL.to_string(),
            private_networks: BTreeMap::new(),
            request_timeout_seconds: IPFS_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl IpfsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub queue: QueueConfig,
    pub ipfs: IpfsConfig,
    /// Seconds between garbage collection sweeps. 0 = disabled.
    pub gc_interval_seconds: u64,
    /// Seconds between reconciler error syncs. 0 = disabled.
    pub reconcile_interval_seconds: u64,
    pub admin_user: String,
    pub max_hold_months: i64,
    pub blob_store: Option<BlobStoreConfig>,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let queue = QueueConfig {
            operation_timeout_seconds: env_or(
                "QUEUE_OPERATION_TIMEOUT_SECONDS",
                QUEUE_OPERATION_TIMEOUT_SECS,
            ),
            visibility_timeout_seconds: env_or(
                "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                QUEUE_VISIBILITY_TIMEOUT_SECS,
            ),
            max_workers: env_or("QUEUE_MAX_WORKERS", QUEUE_MAX_WORKERS).max(1),
            poll_interval_ms: env_or("QUEUE_POLL_INTERVAL_MS", QUEUE_POLL_INTERVAL_MS),
            max_deliveries: env_or("QUEUE_MAX_DELIVERIES", QUEUE_MAX_DELIVERIES).max(1),
        };

        let private_networks = match env::var("IPFS_PRIVATE_NETWORKS") {
            Ok(raw) => parse_network_map(&raw)?,
            Err(_) => BTreeMap::new(),
        };

        let ipfs = IpfsConfig {
            api_url: env::var("IPFS_API_URL").unwrap_or_else(|_| IPFS_API_URL.to_string()),
            cluster_api_url: env::var("IPFS_CLUSTER_API_URL")
                .unwrap_or_else(|_| IPFS_CLUSTER_API_URL.to_string()),
            private_networks,
            request_timeout_seconds: env_or(
                "IPFS_REQUEST_TIMEOUT_SECONDS",
                IPFS_REQUEST_TIMEOUT_SECS,
            ),
        };

        let blob_store = env::var("BLOB_BUCKET").ok().map(|bucket| BlobStoreConfig {
            bucket,
            region: env::var("BLOB_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: env::var("BLOB_ENDPOINT").ok(),
        });

        let config = Config {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            queue,
            ipfs,
            gc_interval_seconds: env_or("GC_INTERVAL_SECONDS", GC_INTERVAL_SECS),
            reconcile_interval_seconds: env_or(
                "RECONCILE_INTERVAL_SECONDS",
                RECONCILE_INTERVAL_SECS,
            ),
            admin_user: env::var("ADMIN_USER").unwrap_or_else(|_| ADMIN_USER.to_string()),
            max_hold_months: env_or("MAX_HOLD_MONTHS", MAX_HOLD_MONTHS),
            blob_store,
            environment: env::var("ENVIRONMENT")
                .or_else(|_| env::var("APP_ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }
        if self.max_hold_months < 0 {
            return Err(anyhow::anyhow!("MAX_HOLD_MONTHS must be >= 0"));
        }
        if self.queue.operation_timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "QUEUE_OPERATION_TIMEOUT_SECONDS must be > 0, broker calls need a bound"
            ));
        }
        if self.queue.visibility_timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "QUEUE_VISIBILITY_TIMEOUT_SECONDS must be > 0, handlers are bounded by it"
            ));
        }
        if self.ipfs.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("IPFS_REQUEST_TIMEOUT_SECONDS must be > 0"));
        }
        if self.admin_user.trim().is_empty() {
            return Err(anyhow::anyhow!("ADMIN_USER cannot be empty"));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_seconds)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse `name=url,name=url` into a map.
pub fn parse_network_map(raw: &str) -> Result<BTreeMap<String, String>, anyhow::Error> {
    let mut networks = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, url) = entry.split_once('=').ok_or_else(|| {
            anyhow::anyhow!(
                "IPFS_PRIVATE_NETWORKS entry '{}' must look like name=url",
                entry
            )
        })?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(anyhow::anyhow!(
                "IPFS_PRIVATE_NETWORKS entry '{}' has an empty name or url",
                entry
            ));
        }
        networks.insert(name.to_string(), url.to_string());
    }
    Ok(networks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: "postgres://localhost/holdfast".to_string(),
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            queue: QueueConfig::default(),
            ipfs: IpfsConfig::default(),
            gc_interval_seconds: GC_INTERVAL_SECS,
            reconcile_interval_seconds: RECONCILE_INTERVAL_SECS,
            admin_user: ADMIN_USER.to_string(),
            max_hold_months: MAX_HOLD_MONTHS,
            blob_store: None,
            environment: "development".to_string(),
        }
    }

    #[test]
    fn test_network_map_parsing() {
        let map = parse_network_map("acme=http://10.0.0.5:5001, labs = http://10.0.0.6:5001").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["labs"], "http://10.0.0.6:5001");
        assert!(parse_network_map("").unwrap().is_empty());
        assert!(parse_network_map("acme").is_err());
        assert!(parse_network_map("=http://x").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut bad = config();
        bad.database_url = "mysql://localhost/holdfast".to_string();
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.queue.operation_timeout_seconds = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_zero_visibility_timeout_rejected() {
        let mut bad = config();
        bad.queue.visibility_timeout_seconds = 0;
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("QUEUE_VISIBILITY_TIMEOUT_SECONDS"));
    }
}
