use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camdrop_core::{
    CameraDirectory, CameraRegistry, DebounceScheduler, DedupeCache, DirectoryObserver,
    IngestConfig, IngestPipeline, MarkerStore, ObserverHandle, QueueAdmissionClient, QueueBackend,
    RedisStore,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::camera_directory::RedisCameraDirectory;
use super::config::Config;

/// Everything started for one ingest run; torn down by [`IngestService::shutdown`].
#[derive(Debug)]
pub struct IngestService {
    observer: ObserverHandle,
    scheduler: DebounceScheduler,
    pipeline: Arc<IngestPipeline>,
    background: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
    grace: Duration,
}

/// Connect to Redis and start the pipeline described by `config`.
pub async fn start(config: &Config) -> Result<IngestService> {
    let store = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("failed to connect to Redis")?,
    );
    let directory = Arc::new(RedisCameraDirectory::new(store.connection()));

    start_with(
        config.pipeline.clone(),
        store.clone(),
        store,
        directory,
        config.shutdown_grace(),
    )
    .await
}

/// Start the pipeline on explicit collaborators.
pub async fn start_with(
    pipeline_config: IngestConfig,
    queue_backend: Arc<dyn QueueBackend>,
    markers: Arc<dyn MarkerStore>,
    directory: Arc<dyn CameraDirectory>,
    grace: Duration,
) -> Result<IngestService> {
    pipeline_config
        .validate()
        .context("invalid pipeline configuration")?;
    let config = Arc::new(pipeline_config);

    let dedupe = Arc::new(DedupeCache::new(markers, config.dedupe.clone()));
    let queue = Arc::new(QueueAdmissionClient::new(
        queue_backend,
        config.queue.clone(),
        config.breaker,
    ));
    let registry = Arc::new(
        CameraRegistry::new(directory).with_registration_timeout(config.camera.registration_timeout()),
    );
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::clone(&config),
        registry,
        Arc::clone(&dedupe),
        queue,
    ));

    let background = CancellationToken::new();
    let sweeper = config
        .dedupe
        .enabled
        .then(|| Arc::clone(&dedupe).spawn_orphan_sweeper(background.child_token()));

    let scheduler = DebounceScheduler::new(config.watch.debounce(), pipeline.clone());
    let observer = match DirectoryObserver::new(config.watch.clone(), scheduler.clone())
        .start()
        .await
    {
        Ok(observer) => observer,
        Err(err) => {
            background.cancel();
            return Err(err)
                .with_context(|| format!("failed to watch {}", config.watch.root.display()));
        }
    };

    info!(
        root = %config.watch.root.display(),
        queue = %config.queue.name,
        max_size = config.queue.max_size,
        overflow_policy = %config.queue.overflow_policy,
        dedupe = config.dedupe.enabled,
        "ingest pipeline started"
    );

    Ok(IngestService {
        observer,
        scheduler,
        pipeline,
        background,
        sweeper,
        grace,
    })
}

impl IngestService {
    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    pub fn scheduler(&self) -> &DebounceScheduler {
        &self.scheduler
    }

    /// Stop watching, cancel pending work, and wait up to the grace period
    /// for in-flight files.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown of ingest pipeline");

        self.observer.stop().await;
        let aborted = self.scheduler.shutdown(self.grace).await;
        if aborted > 0 {
            warn!(aborted, "in-flight uploads abandoned at shutdown");
        }

        self.background.cancel();
        if let Some(sweeper) = self.sweeper
            && let Err(err) = sweeper.await
        {
            warn!("dedupe sweeper task failed: {err}");
        }

        info!(
            cameras = self.pipeline.registry().registered_count(),
            "Ingest pipeline shutdown complete"
        );
    }
}
