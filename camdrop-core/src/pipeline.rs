//! Per-file ingest flow run after the debounce window closes.
//!
//! stability -> validation -> camera registration -> dedupe -> admission.
//! Each stage either hands the file on or ends its journey with an
//! [`IngestOutcome`]; nothing here retries. A later filesystem event for the
//! same path is the retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::{CameraRegistry, camera_folder};
use crate::config::IngestConfig;
use crate::dedupe::DedupeCache;
use crate::queue::{QueueAdmissionClient, QueueAdmissionResult, QueuePayload};
use crate::sanitize::sanitize_error_message;
use crate::stability::wait_with_config;
use crate::validator::{ValidationError, validate_image};
use crate::watch::{FileEvent, PathProcessor};

/// How one processing attempt ended.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    Admitted(QueueAdmissionResult),
    /// Content already admitted within the dedupe TTL.
    Duplicate { fingerprint: String },
    /// Still changing after the attempt budget, or vanished.
    Unstable,
    Invalid(ValidationError),
    /// Not below a camera folder, or the folder name has no usable characters.
    NoCamera,
    /// The queue refused the payload under the `reject` policy.
    Rejected(String),
    /// Store failure, dead-letter failure or open circuit. Message is sanitized.
    Failed(String),
    /// Superseded by a newer event or shut down.
    Cancelled,
}

impl IngestOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, IngestOutcome::Admitted(_))
    }
}

pub struct IngestPipeline {
    config: Arc<IngestConfig>,
    registry: Arc<CameraRegistry>,
    dedupe: Arc<DedupeCache>,
    queue: Arc<QueueAdmissionClient>,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("root", &self.config.watch.root)
            .field("dedupe_enabled", &self.config.dedupe.enabled)
            .field("registry", &self.registry)
            .field("queue", &self.queue.config().name)
            .finish()
    }
}

impl IngestPipeline {
    pub fn new(
        config: Arc<IngestConfig>,
        registry: Arc<CameraRegistry>,
        dedupe: Arc<DedupeCache>,
        queue: Arc<QueueAdmissionClient>,
    ) -> Self {
        Self {
            config,
            registry,
            dedupe,
            queue,
        }
    }

    pub fn registry(&self) -> &CameraRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &QueueAdmissionClient {
        &self.queue
    }

    pub fn dedupe(&self) -> &DedupeCache {
        &self.dedupe
    }

    /// Run one file through every stage.
    pub async fn ingest(&self, event: &FileEvent, cancel: &CancellationToken) -> IngestOutcome {
        let path = event.path.as_path();

        if !wait_with_config(path, &self.config.stability, cancel).await {
            return if cancel.is_cancelled() {
                IngestOutcome::Cancelled
            } else {
                IngestOutcome::Unstable
            };
        }

        let owned = path.to_path_buf();
        let validation = self.config.validation.clone();
        match spawn_blocking(move || validate_image(&owned, &validation)).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return IngestOutcome::Invalid(reason),
            Err(join_err) => {
                return IngestOutcome::Failed(format!("validation task failed: {join_err}"));
            }
        }
        if cancel.is_cancelled() {
            return IngestOutcome::Cancelled;
        }

        let Some((folder, folder_path)) = self.camera_folder_of(path).await else {
            return IngestOutcome::NoCamera;
        };
        let Some(camera_id) = self.registry.ensure_registered(&folder, &folder_path).await else {
            return IngestOutcome::NoCamera;
        };

        let mut fingerprint = None;
        if self.config.dedupe.enabled {
            let check = self.dedupe.is_duplicate_and_mark(path, cancel).await;
            if check.is_duplicate {
                return IngestOutcome::Duplicate {
                    fingerprint: check.fingerprint.unwrap_or_default(),
                };
            }
            fingerprint = check.fingerprint;
        }
        if cancel.is_cancelled() {
            self.release(fingerprint.as_deref()).await;
            return IngestOutcome::Cancelled;
        }

        let payload = QueuePayload::new(camera_id, path, event.detected_at)
            .with_file_hash(fingerprint.clone());
        match self.queue.admit(&payload).await {
            Ok(result) if result.success => IngestOutcome::Admitted(result),
            Ok(result) => {
                self.release(fingerprint.as_deref()).await;
                IngestOutcome::Rejected(result.error.unwrap_or_else(|| "rejected".to_string()))
            }
            Err(err) => {
                self.release(fingerprint.as_deref()).await;
                IngestOutcome::Failed(sanitize_error_message(&err.to_string()))
            }
        }
    }

    /// Camera folder name and its full path, trying the canonical root when
    /// the configured one does not prefix `path`.
    async fn camera_folder_of(&self, path: &Path) -> Option<(String, PathBuf)> {
        let root = &self.config.watch.root;
        if let Some(folder) = camera_folder(root, path) {
            return Some((folder.to_string(), root.join(folder)));
        }
        let canonical = tokio::fs::canonicalize(root).await.ok()?;
        camera_folder(&canonical, path).map(|folder| (folder.to_string(), canonical.join(folder)))
    }

    async fn release(&self, fingerprint: Option<&str>) {
        let Some(fingerprint) = fingerprint else {
            return;
        };
        if let Err(err) = self.dedupe.release(fingerprint).await {
            warn!(
                fingerprint,
                "failed to release dedupe marker: {}",
                sanitize_error_message(&err.to_string())
            );
        }
    }
}

#[async_trait]
impl PathProcessor for IngestPipeline {
    async fn process(&self, event: FileEvent, cancel: CancellationToken) {
        let file = event
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        match self.ingest(&event, &cancel).await {
            IngestOutcome::Admitted(result) => {
                info!(
                    file = %file,
                    queue_length = result.queue_length,
                    moved_to_dlq = result.moved_to_dlq_count,
                    evicted = result.evicted_count,
                    "upload admitted"
                );
                if let Some(warning) = result.warning {
                    warn!(file = %file, "{warning}");
                }
            }
            IngestOutcome::Duplicate { fingerprint } => {
                debug!(file = %file, fingerprint = %fingerprint, "duplicate upload skipped");
            }
            IngestOutcome::Unstable => {
                debug!(file = %file, "upload did not stabilise, waiting for next event");
            }
            IngestOutcome::Invalid(reason) => {
                warn!(file = %file, "upload rejected: {reason}");
            }
            IngestOutcome::NoCamera => {
                warn!(file = %file, "upload has no usable camera folder, dropped");
            }
            IngestOutcome::Rejected(message) => {
                warn!(file = %file, "queue refused upload: {}", sanitize_error_message(&message));
            }
            IngestOutcome::Failed(message) => {
                warn!(file = %file, "upload admission failed: {message}");
            }
            IngestOutcome::Cancelled => {
                debug!(file = %file, "processing superseded or cancelled");
            }
        }
    }
}
