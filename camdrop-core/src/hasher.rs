//! Streaming content fingerprints.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bytes read per chunk; bounds memory regardless of file size.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hex length of a fingerprint produced by [`fingerprint_file`].
pub const FINGERPRINT_LEN: usize = 64;

/// SHA-256 of the file contents as lowercase hex.
///
/// Returns `None` when the file is missing, empty, unreadable, or the token is
/// cancelled between chunks. The caller decides what an unavailable
/// fingerprint means.
pub async fn fingerprint_file(path: &Path, cancel: &CancellationToken) -> Option<String> {
    let owned: PathBuf = path.to_path_buf();
    let token = cancel.clone();
    match spawn_blocking(move || fingerprint_blocking(&owned, &token)).await {
        Ok(result) => result,
        Err(join_err) => {
            warn!("fingerprint task failed: {join_err}");
            None
        }
    }
}

/// Blocking variant of [`fingerprint_file`] for callers already on a
/// blocking thread.
pub fn fingerprint_blocking(path: &Path, cancel: &CancellationToken) -> Option<String> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(file = %display_name(path), "file vanished before hashing");
            return None;
        }
        Err(err) => {
            warn!(file = %display_name(path), "cannot open file for hashing: {}", err.kind());
            return None;
        }
    };

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            debug!(file = %display_name(path), "hashing cancelled");
            return None;
        }
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(file = %display_name(path), "read failed while hashing: {}", err.kind());
                return None;
            }
        };
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    if total == 0 {
        return None;
    }

    Some(hex::encode(hasher.finalize()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
