//! Upload stability probing.
//!
//! FTP uploads show up as a file that keeps growing. Processing it before the
//! transfer finishes yields a truncated image, so the pipeline waits until
//! size and modification time hold still for a full window.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::StabilityConfig;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct FileSample {
    len: u64,
    modified: Option<SystemTime>,
}

async fn sample(path: &Path) -> Option<FileSample> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    if !meta.is_file() {
        return None;
    }
    Some(FileSample {
        len: meta.len(),
        modified: meta.modified().ok(),
    })
}

/// Poll `path` until it stops changing for `stability_window`.
///
/// Returns `false` when the file disappears, when `max_attempts` samples pass
/// without a stable window, or when `cancel` fires.
pub async fn wait_until_stable(
    path: &Path,
    stability_window: Duration,
    poll_interval: Duration,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> bool {
    let Some(mut last) = sample(path).await else {
        debug!(file = ?path.file_name(), "file missing before stability probe");
        return false;
    };
    let mut unchanged_since = Instant::now();

    for attempt in 1..=max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                trace!(file = ?path.file_name(), attempt, "stability probe cancelled");
                return false;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }

        let Some(current) = sample(path).await else {
            debug!(file = ?path.file_name(), attempt, "file disappeared during stability probe");
            return false;
        };

        if current == last {
            if unchanged_since.elapsed() >= stability_window {
                trace!(file = ?path.file_name(), attempt, size = current.len, "file is stable");
                return true;
            }
        } else {
            trace!(
                file = ?path.file_name(),
                attempt,
                previous = last.len,
                size = current.len,
                "file still changing"
            );
            last = current;
            unchanged_since = Instant::now();
        }
    }

    debug!(
        file = ?path.file_name(),
        max_attempts,
        "file never stabilised within the attempt budget"
    );
    false
}

/// [`wait_until_stable`] with the knobs from configuration.
pub async fn wait_with_config(
    path: &Path,
    config: &StabilityConfig,
    cancel: &CancellationToken,
) -> bool {
    wait_until_stable(
        path,
        config.window(),
        config.poll_interval(),
        config.max_attempts,
        cancel,
    )
    .await
}
