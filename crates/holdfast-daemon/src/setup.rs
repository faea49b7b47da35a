//! Database setup and component wiring

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use holdfast_core::{Clock, Config, SystemClock};
use holdfast_db::create_upload_ledger;
use holdfast_ipfs::{BackendRouter, ClusterClient};
use holdfast_queue::{JobQueueGateway, PgBroker};
use holdfast_services::{
    BlobStore, ClusterReconciler, GarbageCollector, IntentProcessor, S3BlobStore,
};

/// Connect the pool and apply pending migrations.
pub async fn setup_database(config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_timeout())
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Everything the daemon and its one-shot commands run against.
pub struct Components {
    pub pool: PgPool,
    pub broker: PgBroker,
    pub reconciler: Arc<ClusterReconciler>,
    pub gc: Arc<GarbageCollector>,
    pub processor: Arc<IntentProcessor>,
}

pub async fn initialize(config: &Config) -> Result<Components> {
    let pool = setup_database(config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let broker = PgBroker::new(pool.clone());
    let gateway = JobQueueGateway::new(Arc::new(broker.clone()), config.queue.operation_timeout());
    gateway
        .declare_topology()
        .await
        .context("Failed to declare queue topology")?;

    let ledger = create_upload_ledger(pool.clone(), clock.clone());

    let router = BackendRouter::from_config(&config.ipfs).context("Invalid IPFS node configuration")?;
    let cluster = Arc::new(
        ClusterClient::new(&config.ipfs.cluster_api_url, config.ipfs.request_timeout())
            .context("Invalid IPFS cluster configuration")?,
    );
    tracing::info!(
        networks = ?router.networks(),
        cluster = %config.ipfs.cluster_api_url,
        "Storage backends configured"
    );

    let blobs: Option<Arc<dyn BlobStore>> = config.blob_store.as_ref().map(|blob_config| {
        tracing::info!(bucket = %blob_config.bucket, region = %blob_config.region, "Blob store configured");
        Arc::new(S3BlobStore::new(blob_config)) as Arc<dyn BlobStore>
    });
    if blobs.is_none() {
        tracing::warn!("BLOB_BUCKET not set, add-file intents will be dead-lettered");
    }

    let reconciler = Arc::new(ClusterReconciler::new(cluster.clone()));
    let gc = Arc::new(GarbageCollector::new(ledger.clone(), gateway, clock));
    let processor = Arc::new(IntentProcessor::new(router, cluster, ledger, blobs));

    Ok(Components {
        pool,
        broker,
        reconciler,
        gc,
        processor,
    })
}
