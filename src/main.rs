use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use registry_reaper::deletion::{DeletionService, NoPackageWrapper};
use registry_reaper::events::{EventDispatcher, QueuedEventReporter, TracingSink};
use registry_reaper::metadata::{MetadataStore, PostgresMetadataPool, SoftDeleteFilter};
use registry_reaper::package_type::Capabilities;
use registry_reaper::purge::{PurgeJob, Purger};
use registry_reaper::{Config, FilesBackend, MetadataBackend, RegistryInfo};

#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply the database schema.
    Migrate,
    /// Purge soft-deleted rows of one account.
    Purge {
        #[arg(long)]
        account: String,
        /// Epoch millis; defaults to now minus the configured retention.
        #[arg(long)]
        before: Option<i64>,
    },
    /// Hard delete a package.
    DeleteImage {
        #[arg(long)]
        registry_id: i64,
        #[arg(long)]
        image: String,
    },
    /// Hard delete one version of a package.
    DeleteVersion {
        #[arg(long)]
        registry_id: i64,
        #[arg(long)]
        image: String,
        #[arg(long)]
        version: String,
    },
    /// Run the scheduled purge job until interrupted.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .compact()
        .init();

    let config = Config::from_file(&cli.config_file.unwrap_or("./dev-config.yml".into()))?;

    let metadata = match &config.metadata {
        MetadataBackend::Postgres(cfg) => cfg.new_metadata().await?,
    };

    match cli.command {
        Command::Migrate => {
            metadata.migrate().await?;
            tracing::info!("migrations applied");
        }
        Command::Purge { account, before } => {
            let cutoff = before
                .unwrap_or_else(|| (Utc::now() - config.purge.retention()).timestamp_millis());
            let report = Purger::new(metadata).purge(&account, cutoff).await;
            if !report.is_complete() {
                anyhow::bail!("purge incomplete, failed stages: {:?}", report.failed);
            }
            tracing::info!(total = report.total(), "purge complete");
        }
        Command::DeleteImage { registry_id, image } => {
            let registry = resolve_registry(&metadata, registry_id).await?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (svc, dispatcher) = deletion_service(&config, metadata, shutdown_rx).await?;

            let result = svc
                .delete_image_by_package_type(&registry, &image, None)
                .await;
            drop(svc);
            dispatcher.await?;
            drop(shutdown_tx);
            result?;
        }
        Command::DeleteVersion {
            registry_id,
            image,
            version,
        } => {
            let registry = resolve_registry(&metadata, registry_id).await?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (svc, dispatcher) = deletion_service(&config, metadata, shutdown_rx).await?;

            let result = svc
                .delete_artifact_version_by_package_type(
                    &registry,
                    &image,
                    &version,
                    None,
                    &registry.registry_name,
                )
                .await;
            drop(svc);
            dispatcher.await?;
            drop(shutdown_tx);
            result?;
        }
        Command::Run => run(&config, metadata).await?,
    }

    Ok(())
}

async fn run(config: &Config, metadata: PostgresMetadataPool) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let job = PurgeJob::new(
        Purger::new(metadata),
        config.purge.accounts.clone(),
        config.purge.retention(),
        config.purge.interval(),
    );
    let purge = tokio::spawn(job.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown_tx.send(true)?;

    purge.await?;
    Ok(())
}

async fn resolve_registry(
    metadata: &PostgresMetadataPool,
    registry_id: i64,
) -> Result<RegistryInfo> {
    let registry = metadata
        .get_registry(registry_id, SoftDeleteFilter::ExcludeDeleted)
        .await?;
    Ok(RegistryInfo::from(&registry))
}

/// Build a deletion service for operator initiated cleanup. Events are drained into the
/// tracing sink by the returned task, which finishes once the service is dropped.
async fn deletion_service(
    config: &Config,
    metadata: PostgresMetadataPool,
    shutdown: watch::Receiver<bool>,
) -> Result<(DeletionService<PostgresMetadataPool>, JoinHandle<u64>)> {
    let files = match &config.files {
        FilesBackend::S3(cfg) => cfg.new_files().await?,
    };

    let (reporter, rx) = QueuedEventReporter::new(config.events.queue_capacity);
    let dispatcher = tokio::spawn(EventDispatcher::new(rx, TracingSink).run(shutdown));

    let svc = DeletionService::new(
        metadata,
        Arc::new(files),
        Arc::new(NoPackageWrapper),
        Arc::new(reporter),
        Arc::new(Capabilities::new()),
        config.deletion.untagged_images_enabled,
    );
    Ok((svc, dispatcher))
}
