use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use watchpost::{
    actors::{
        collector::CollectorHandle,
        incident::IncidentHandle,
        scheduler::SchedulerHandle,
        storage::{StorageHandle, StorageInputs},
    },
    config::{ResolvedStorageConfig, StorageKind, read_config_file},
    incidents::IncidentEngine,
    storage::{MemoryBackend, StorageBackend},
    util::{apply_env_overrides, get_config_path},
};

/// Capacity of every event channel
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file, defaults to $WATCHPOST_CONFIG or ./config.json
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("watchpost", LevelFilter::TRACE),
        ("watchpost_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn open_backend(config: &ResolvedStorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match &config.kind {
        StorageKind::Memory => {
            warn!("using in-memory storage, data is lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageKind::Sqlite { path } => {
            let backend = watchpost::storage::sqlite::SqliteBackend::with_timeout(
                path,
                config.connect_timeout,
            )
            .await
            .with_context(|| format!("opening {}", path.display()))?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageKind::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(get_config_path);
    let mut config = read_config_file(&path)?.resolve()?;
    apply_env_overrides(&mut config.storage);

    let backend = open_backend(&config.storage).await?;

    let (check_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let (stat_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let (incident_tx, _) = broadcast::channel(EVENT_CAPACITY);

    // Subscribers first, so the first check results are not missed.
    let storage = StorageHandle::spawn(
        backend,
        &config.batch,
        Some(config.storage.clone()),
        StorageInputs {
            check_rx: check_tx.subscribe(),
            stat_rx: stat_tx.subscribe(),
            incident_rx: incident_tx.subscribe(),
        },
    );

    let engine = Arc::new(IncidentEngine::new());
    let open = storage
        .service()
        .get_active_incidents()
        .await
        .context("loading open incidents")?;
    let mut restored = 0;
    for incident in open {
        if engine.restore(incident).await {
            restored += 1;
        }
    }
    debug!("restored {restored} open incidents");

    let incidents = IncidentHandle::spawn(engine, check_tx.subscribe(), incident_tx.clone());

    let mut schedulers = Vec::with_capacity(config.checks.len());
    for check in &config.checks {
        schedulers.push(SchedulerHandle::spawn(check, check_tx.clone())?);
    }

    let mut collectors = Vec::with_capacity(config.agents.len());
    for agent in &config.agents {
        collectors.push(CollectorHandle::spawn(agent.clone(), stat_tx.clone())?);
    }

    info!(
        checks = schedulers.len(),
        agents = collectors.len(),
        "watchpost hub running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");

    // Producers first, storage last so it can flush what they sent.
    for scheduler in schedulers {
        scheduler.shutdown().await;
    }
    for collector in collectors {
        if let Err(e) = collector.shutdown().await {
            error!("{e:#}");
        }
    }
    incidents.shutdown().await;
    storage.shutdown().await;

    Ok(())
}
