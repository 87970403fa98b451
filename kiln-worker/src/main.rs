//! Kiln Worker
//!
//! A stateless build worker fed by a message queue.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: Broker and object store adapters (status, dead letters, objects)
//! - Services: Business logic (build pipeline, artifact upload, status reporting)
//! - Scheduler: Message settlement and broker reconnection
//!
//! The worker consumes build commands, clones and builds each site in its
//! own working directory, uploads the output and reports one terminal
//! status per command.

mod config;
mod process;
mod repository;
mod scheduler;
mod service;
mod workspace;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::process::ProcessRunner;
use crate::repository::S3ObjectRepository;
use crate::scheduler::{AmqpSession, ReconnectSupervisor};
use crate::service::{
    ArtifactService, BuildService, ProgressSink, StandardArtifactService, StandardBuildService,
    TracingProgressSink,
};
use kiln_client::StorageClient;

#[derive(Parser)]
#[command(name = "kiln-worker")]
#[command(about = "Queue-driven static site build worker", long_about = None)]
struct Cli {
    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_worker=info,kiln_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    if cli.print_config {
        println!("{}", config);
        return config.validate();
    }

    config.validate()?;

    info!("Starting Kiln Worker");
    info!(
        "Loaded configuration: worker_id={}, broker={}:{}, commands={}, prefetch={}",
        config.worker_id,
        config.broker.host,
        config.broker.port,
        config.commands_queue,
        config.prefetch_count
    );

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create work directory {}",
                config.work_dir.display()
            )
        })?;

    // Initialize object store client
    let storage = StorageClient::connect(&config.storage)
        .await
        .context("Failed to initialize object store client")?;
    info!("Object store client initialized (bucket {})", storage.bucket());

    // Initialize services
    let artifacts: Arc<dyn ArtifactService> = Arc::new(StandardArtifactService::new(Arc::new(
        S3ObjectRepository::new(storage),
    )));
    let progress: Arc<dyn ProgressSink> = Arc::new(TracingProgressSink);
    let builds: Arc<dyn BuildService> = Arc::new(StandardBuildService::new(
        ProcessRunner::new(),
        artifacts,
        progress,
        config.work_dir.clone(),
    ));

    info!("Services initialized");

    // Supervise the broker session forever
    let supervisor = ReconnectSupervisor::new(AmqpSession::new(config, builds));
    supervisor.run().await;

    Ok(())
}
