//! Camera auto-registration.
//!
//! Every first-level folder under the upload root is a camera. The folder name
//! is normalised into an identifier and the owning service is asked to create
//! the camera the first time this process sees it.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CameraConfig;
use crate::error::{Result, with_timeout};
use crate::sanitize::sanitize_error_message;

/// Record handed to [`CameraDirectory::create_camera`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCamera {
    pub id: String,
    /// Folder name as uploaded, e.g. `Front Door`.
    pub display_name: String,
    pub folder_path: PathBuf,
}

/// Persistence collaborator that owns camera records.
#[async_trait]
pub trait CameraDirectory: Send + Sync {
    async fn create_camera(&self, camera: &NewCamera) -> Result<()>;
}

/// Directory that records nothing; used when camera records live elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCameraDirectory;

#[async_trait]
impl CameraDirectory for NoopCameraDirectory {
    async fn create_camera(&self, _camera: &NewCamera) -> Result<()> {
        Ok(())
    }
}

/// Canonical camera identifier for a folder name.
///
/// Lowercases, turns whitespace and hyphens into underscores, drops other
/// punctuation, collapses underscore runs, and trims underscores at the
/// edges. Returns `None` when nothing usable remains.
pub fn normalize_camera_id(folder_name: &str) -> Option<String> {
    let mut id = String::with_capacity(folder_name.len());
    for ch in folder_name.chars().flat_map(char::to_lowercase) {
        let mapped = if ch.is_whitespace() || ch == '-' || ch == '_' {
            '_'
        } else if ch.is_alphanumeric() {
            ch
        } else {
            continue;
        };
        if mapped == '_' && (id.is_empty() || id.ends_with('_')) {
            continue;
        }
        id.push(mapped);
    }
    while id.ends_with('_') {
        id.pop();
    }
    (!id.is_empty()).then_some(id)
}

/// First path segment below `root`, the camera folder for an upload.
///
/// Files directly in the root have no camera folder and yield `None`.
pub fn camera_folder<'a>(root: &Path, path: &'a Path) -> Option<&'a str> {
    let rel = path.strip_prefix(root).ok()?;
    let mut components = rel.components();
    let first = components.next()?;
    // Require at least one more segment: the file itself.
    components.next()?;
    match first {
        std::path::Component::Normal(segment) => segment.to_str(),
        _ => None,
    }
}

/// Tracks which cameras were registered by this process and registers new
/// ones exactly once.
pub struct CameraRegistry {
    directory: Arc<dyn CameraDirectory>,
    registered: Mutex<HashSet<String>>,
    timeout: Duration,
}

impl fmt::Debug for CameraRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraRegistry")
            .field("registered", &self.registered.lock().len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CameraRegistry {
    pub fn new(directory: Arc<dyn CameraDirectory>) -> Self {
        Self {
            directory,
            registered: Mutex::new(HashSet::new()),
            timeout: CameraConfig::default().registration_timeout(),
        }
    }

    /// Bound each creation call; a call that runs over counts as a failure.
    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Normalise `folder_name` and make sure the camera exists.
    ///
    /// Returns the camera id, or `None` when the name has no usable
    /// characters. Creation failures are logged and swallowed: the camera
    /// record is an index for other services, and admission must not wait on
    /// it.
    pub async fn ensure_registered(&self, folder_name: &str, folder_path: &Path) -> Option<String> {
        let id = normalize_camera_id(folder_name)?;

        let first_sighting = self.registered.lock().insert(id.clone());
        if !first_sighting {
            return Some(id);
        }

        let camera = NewCamera {
            id: id.clone(),
            display_name: folder_name.to_string(),
            folder_path: folder_path.to_path_buf(),
        };
        let created = with_timeout(
            "camera registration",
            self.timeout,
            self.directory.create_camera(&camera),
        )
        .await;
        match created {
            Ok(()) => info!(camera_id = %id, display_name = %folder_name, "registered camera"),
            Err(err) => warn!(
                camera_id = %id,
                "camera registration failed, continuing without it: {}",
                sanitize_error_message(&err.to_string())
            ),
        }
        Some(id)
    }

    pub fn is_registered(&self, camera_id: &str) -> bool {
        self.registered.lock().contains(camera_id)
    }

    pub fn registered_count(&self) -> usize {
        self.registered.lock().len()
    }
}
