//! CLI helper functions
//!
//! Each subcommand of `zetl` maps to one function here. They build the
//! backends from a [`PipelineConfig`] and wire the steps together.

use crate::{
    client::{ApiCredentials, SearchClient},
    config::{PipelineConfig, StoreBackend, WarehouseBackend},
    handlers::{Dispatch, EventRouter, Replicator, TransformHandler, TransformOutcome},
    listings::{ListingsExtractor, Stager},
    orchestrator::{MainChain, RunReport},
    run_context::RunContext,
    scheduler::Scheduler,
    storage::{
        BucketWatcher, ExistenceGate, LocalObjectStore, ObjectCreated, ObjectLocation,
        ObjectStore, S3Event, S3ObjectStore,
    },
    warehouse::{CopyOptions, LocalWarehouse, RedshiftWarehouse, TableRef, Warehouse, WarehouseLoader},
};
use eyre::{Context, Result, eyre};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Read the config file, apply environment overrides and validate
pub fn load_config(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let config = PipelineConfig::read(path)?.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Object store selected by `store.backend`
pub async fn build_store(config: &PipelineConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.store.backend {
        StoreBackend::Local => Arc::new(LocalObjectStore::new(&config.store.root)?),
        StoreBackend::S3 => Arc::new(S3ObjectStore::from_env(config.store.region.clone()).await),
    };
    log::debug!("Object store: {}", store.describe());
    Ok(store)
}

/// Warehouse selected by `warehouse.backend`
pub fn build_warehouse(config: &PipelineConfig, store: Arc<dyn ObjectStore>) -> Arc<dyn Warehouse> {
    match config.warehouse.backend {
        WarehouseBackend::Local => Arc::new(LocalWarehouse::new(&config.warehouse.root, store)),
        WarehouseBackend::Redshift => {
            Arc::new(RedshiftWarehouse::new(config.warehouse.redshift.clone()))
        }
    }
}

pub fn build_gate(config: &PipelineConfig, cancel: &CancellationToken) -> ExistenceGate {
    ExistenceGate::new(config.gate).with_cancellation(cancel.clone())
}

/// Transform and archive handlers for ingest bucket events
pub fn build_router(
    config: &PipelineConfig,
    store: Arc<dyn ObjectStore>,
    cancel: &CancellationToken,
) -> EventRouter {
    let gate = build_gate(config, cancel);
    EventRouter::new(
        TransformHandler::new(store.clone(), &config.buckets.transform, gate.clone()),
        Replicator::new(store, &config.buckets.archive, gate),
    )
}

fn build_extractor(config: &PipelineConfig) -> Result<ListingsExtractor> {
    let url = Url::parse(&config.api.url)
        .with_context(|| format!("Invalid API url: {}", config.api.url))?;

    let credentials = if config.api.credentials.exists() {
        ApiCredentials::read(&config.api.credentials)?
    } else {
        log::warn!(
            "Credentials file {} not found, sending no auth headers",
            config.api.credentials.display()
        );
        ApiCredentials::none()
    };
    log::debug!("API credentials: {}", credentials);

    let client = SearchClient::try_new(url, credentials).context("Failed to create API client")?;
    Ok(ListingsExtractor::new(
        client,
        &config.api.location,
        &config.staging_dir,
    ))
}

/// The main chain with every backend wired from `config`
pub fn build_chain(
    config: &PipelineConfig,
    store: Arc<dyn ObjectStore>,
    cancel: &CancellationToken,
) -> Result<MainChain> {
    let table = TableRef::new(&config.warehouse.schema, &config.warehouse.table)?;
    let options = CopyOptions {
        ignore_header: config.warehouse.ignore_header,
    };
    let loader = WarehouseLoader::new(
        store.clone(),
        build_warehouse(config, store.clone()),
        table,
        options,
    );

    Ok(MainChain::new(
        build_extractor(config)?,
        Stager::new(store.clone(), &config.buckets.ingest),
        store,
        ExistenceGate::new(config.gate),
        loader,
        &config.buckets.transform,
        config.retry,
    )
    .with_cancellation(cancel.clone()))
}

/// Watch the ingest bucket in the background, dispatching new keys to the handlers
///
/// Keys already in the bucket when this returns are not dispatched.
pub async fn spawn_watcher(
    config: &PipelineConfig,
    store: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
) -> Result<JoinHandle<Result<()>>> {
    let router = build_router(config, store.clone(), &cancel);
    let mut watcher = BucketWatcher::new(store, &config.buckets.ingest, config.gate.interval);
    watcher.prime().await?;

    Ok(tokio::spawn(async move {
        watcher
            .run(cancel, |events| {
                let router = router.clone();
                async move {
                    router.dispatch_all(events).await;
                }
            })
            .await
    }))
}

type Background = Option<(CancellationToken, JoinHandle<Result<()>>)>;

async fn start_watcher(
    config: &PipelineConfig,
    store: &Arc<dyn ObjectStore>,
    cancel: &CancellationToken,
    enabled: bool,
) -> Result<Background> {
    if !enabled {
        return Ok(None);
    }
    let token = cancel.child_token();
    let handle = spawn_watcher(config, store.clone(), token.clone()).await?;
    Ok(Some((token, handle)))
}

async fn stop_watcher(watcher: Background) -> Result<()> {
    if let Some((token, handle)) = watcher {
        token.cancel();
        handle.await.context("Watcher task panicked")??;
    }
    Ok(())
}

/// Run the main chain once
///
/// With `watch`, the ingest bucket watcher runs alongside the chain so that
/// stores without native events still get their CSV produced.
pub async fn run_pipeline(
    config: &PipelineConfig,
    watch: bool,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let store = build_store(config).await?;
    let chain = build_chain(config, store.clone(), cancel)?;

    let watcher = start_watcher(config, &store, cancel, watch).await?;

    let report = chain.run(RunContext::now()).await;
    stop_watcher(watcher).await?;
    report.into_result()
}

/// Extract and stage only; returns the raw artifact location
pub async fn extract_and_stage(config: &PipelineConfig) -> Result<ObjectLocation> {
    let store = build_store(config).await?;
    let extraction = build_extractor(config)?.extract(&RunContext::now()).await?;
    Stager::new(store, &config.buckets.ingest)
        .stage(&extraction)
        .await
}

/// Run the transform handler for one object
pub async fn transform_object(
    config: &PipelineConfig,
    bucket: &str,
    key: &str,
    cancel: &CancellationToken,
) -> Result<TransformOutcome> {
    let store = build_store(config).await?;
    TransformHandler::new(store, &config.buckets.transform, build_gate(config, cancel))
        .handle(&ObjectCreated::new(bucket, key))
        .await
}

/// Run the archive handler for one object
pub async fn replicate_object(
    config: &PipelineConfig,
    bucket: &str,
    key: &str,
    cancel: &CancellationToken,
) -> Result<ObjectLocation> {
    let store = build_store(config).await?;
    Replicator::new(store, &config.buckets.archive, build_gate(config, cancel))
        .handle(&ObjectCreated::new(bucket, key))
        .await
}

/// Dispatch an S3 event notification from a file, or stdin when `source` is `-`
///
/// # Errors
/// Fails if the event can't be read or any handler failed
pub async fn handle_event(
    config: &PipelineConfig,
    source: &str,
    cancel: &CancellationToken,
) -> Result<Vec<Dispatch>> {
    let body = if source == "-" {
        let mut body = String::new();
        tokio::io::stdin()
            .read_to_string(&mut body)
            .await
            .context("Failed to read event from stdin")?;
        body
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read event file {}", source))?
    };

    let events = S3Event::from_json(&body)?.object_created();
    log::info!("Event carries {} object-created record(s)", events.len());

    let store = build_store(config).await?;
    let dispatches = build_router(config, store, cancel).dispatch_all(events).await;

    let failed = dispatches.iter().filter(|d| !d.is_ok()).count();
    if failed > 0 {
        return Err(eyre!("{} of {} event(s) failed", failed, dispatches.len()));
    }
    Ok(dispatches)
}

/// Watch the ingest bucket until cancelled
pub async fn watch(config: &PipelineConfig, cancel: &CancellationToken) -> Result<()> {
    let store = build_store(config).await?;
    spawn_watcher(config, store, cancel.clone())
        .await?
        .await
        .context("Watcher task panicked")?
}

/// Run the main chain on the configured cadence until cancelled
///
/// A failed run is logged and does not stop the schedule.
pub async fn schedule(config: &PipelineConfig, watch: bool, cancel: &CancellationToken) -> Result<u64> {
    let store = build_store(config).await?;
    let chain = build_chain(config, store.clone(), cancel)?;

    let watcher = start_watcher(config, &store, cancel, watch).await?;

    let chain = &chain;
    let runs = Scheduler::new(config.schedule, cancel.clone())
        .run(move |_| async move {
            let report = chain.run(RunContext::now()).await;
            match report.into_result() {
                Ok(report) => log::info!(
                    "Run {} loaded {} row(s)",
                    report.context,
                    report.rows_loaded.unwrap_or_default()
                ),
                Err(e) => log::error!("{:#}", e),
            }
        })
        .await;

    stop_watcher(watcher).await?;
    Ok(runs)
}
