//! # Camdrop Core
//!
//! Ingest library for security-camera uploads arriving over FTP. Cameras drop
//! JPEGs into one folder each under a shared root; this crate turns those
//! files into queue entries for the detection workers.
//!
//! ## Overview
//!
//! - **Directory observer**: native or polling `notify` watcher on the upload root
//! - **Debounce**: one processing attempt per burst of events on a path
//! - **Stability probe**: waits for growing uploads to settle
//! - **Validation**: extension, size, and full decode checks
//! - **Camera registry**: auto-registers cameras from folder names
//! - **Dedupe**: SHA-256 fingerprints with expiring markers in a shared store
//! - **Queue admission**: bounded queue with overflow policies, a dead-letter
//!   queue behind a circuit breaker, and compressed payload framing
//!
//! ## Feature Flags
//!
//! - `redis` (default): Redis-backed queue and marker store
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use camdrop_core::{
//!     CameraRegistry, DebounceScheduler, DedupeCache, DirectoryObserver, IngestConfig,
//!     IngestPipeline, InMemoryStore, NoopCameraDirectory, QueueAdmissionClient,
//! };
//!
//! async fn run() -> camdrop_core::Result<()> {
//!     let config = Arc::new(IngestConfig::default());
//!     let store = Arc::new(InMemoryStore::new());
//!     let pipeline = Arc::new(IngestPipeline::new(
//!         Arc::clone(&config),
//!         Arc::new(CameraRegistry::new(Arc::new(NoopCameraDirectory))),
//!         Arc::new(DedupeCache::new(store.clone(), config.dedupe.clone())),
//!         Arc::new(QueueAdmissionClient::new(store, config.queue.clone(), config.breaker)),
//!     ));
//!     let scheduler = DebounceScheduler::new(config.watch.debounce(), pipeline);
//!     let handle = DirectoryObserver::new(config.watch.clone(), scheduler.clone())
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop().await;
//!     scheduler.shutdown(std::time::Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Camera identifiers and auto-registration
pub mod camera;

/// Pipeline configuration
pub mod config;

/// Content-hash deduplication
pub mod dedupe;

/// Error types
pub mod error;

pub mod hasher;

/// Per-file ingest flow
pub mod pipeline;

/// Bounded queue admission, dead-letter handling, and payload framing
pub mod queue;

/// Redaction of paths and credentials in error text
pub mod sanitize;

pub mod stability;

/// Queue and marker storage backends
pub mod store;

pub mod validator;

/// Filesystem observation and debounce
pub mod watch;

pub use camera::{CameraDirectory, CameraRegistry, NewCamera, NoopCameraDirectory};
pub use config::{
    BreakerConfig, CameraConfig, DedupeConfig, IngestConfig, OverflowPolicy, QueueConfig, StabilityConfig,
    ValidationConfig, WatchConfig,
};
pub use dedupe::{DedupeCache, DedupeCheck};
pub use error::{IngestError, Result};
pub use pipeline::{IngestOutcome, IngestPipeline};
pub use queue::{CircuitState, QueueAdmissionClient, QueueAdmissionResult, QueuePayload};
pub use sanitize::sanitize_error_message;
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use store::{InMemoryStore, MarkerStore, QueueBackend};
pub use validator::ValidationError;
pub use watch::{DebounceScheduler, DirectoryObserver, FileEvent, ObserverHandle, PathProcessor};
