//! holdfastd: pin lifecycle daemon.
//!
//! `run` starts the intent workers plus the periodic garbage collector and
//! cluster reconciler. The other subcommands perform one pass of a single
//! task and exit. Configuration comes from the environment (see
//! `holdfast_core::Config`).

mod setup;
mod telemetry;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use holdfast_core::Config;
use holdfast_queue::{ConsumerConfig, IntentConsumer};

#[derive(Parser)]
#[command(name = "holdfastd", about = "Pin lifecycle daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run intent workers, garbage collection and cluster reconciliation
    Run,
    /// Sweep expired uploads once and dispatch their removal intents
    Gc,
    /// Ask the cluster to recover every locally failed pin
    SyncErrors,
    /// Show the cluster status of a content id
    Status {
        /// Content id (CID)
        cid: String,
        /// Aggregate over every peer instead of the local peer only
        #[arg(long)]
        global: bool,
    },
    /// Remove a content id from the cluster pin set
    RemovePin {
        /// Content id (CID)
        cid: String,
    },
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env().context("Configuration validation failed")?;
    tracing::info!(environment = %config.environment, "Configuration loaded");

    let components = setup::initialize(&config).await?;

    match cli.command {
        Commands::Run => run(&config, components).await?,
        Commands::Gc => {
            let expired = components.gc.sweep().await?;
            let content_ids: Vec<&str> = expired.iter().map(|r| r.content_id.as_str()).collect();
            print_json(&content_ids)?;
        }
        Commands::SyncErrors => {
            let repaired = components.reconciler.sync_local_errors().await?;
            print_json(&repaired)?;
        }
        Commands::Status { cid, global } => {
            let entry = if global {
                components.reconciler.global_status(&cid).await?
            } else {
                components.reconciler.local_status(&cid).await?
            };
            print_json(&entry)?;
        }
        Commands::RemovePin { cid } => {
            components.reconciler.remove_pin(&cid).await?;
            println!("Removed {} from the cluster pin set", cid);
        }
    }

    Ok(())
}

async fn run(config: &Config, components: setup::Components) -> Result<()> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    let consumer = IntentConsumer::start(
        Arc::new(components.broker.repository().clone()),
        components.processor.clone(),
        ConsumerConfig::from_queue_config(&config.queue),
        Some(components.pool.clone()),
    );
    tracing::info!(
        host = %host,
        consumer_id = %consumer.consumer_id(),
        workers = config.queue.max_workers,
        "Intent consumer started"
    );

    let mut tasks = Vec::new();
    if config.gc_interval_seconds > 0 {
        tasks.push(
            components
                .gc
                .clone()
                .start(Duration::from_secs(config.gc_interval_seconds)),
        );
    } else {
        tracing::info!("Garbage collection disabled");
    }
    if config.reconcile_interval_seconds > 0 {
        tasks.push(
            components
                .reconciler
                .clone()
                .start(Duration::from_secs(config.reconcile_interval_seconds)),
        );
    } else {
        tracing::info!("Cluster reconciliation disabled");
    }

    shutdown_signal().await?;

    consumer.shutdown().await;
    for task in tasks {
        task.abort();
    }
    components.pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                tracing::info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => {
                tracing::info!("Received terminate signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("Failed to listen for Ctrl+C")?;
        tracing::info!("Received Ctrl+C signal");
    }

    Ok(())
}
