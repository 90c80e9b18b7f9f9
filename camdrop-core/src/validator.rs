use std::path::Path;

use image::ImageReader;
use thiserror::Error;

use crate::config::ValidationConfig;

/// Why a file was refused. Validation failures are final: the file is logged
/// and dropped, never retried or queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported file extension `{0}`")]
    UnsupportedExtension(String),

    #[error("file has no extension")]
    MissingExtension,

    #[error("file not found")]
    NotFound,

    #[error("not a regular file")]
    NotAFile,

    #[error("file is empty")]
    Empty,

    #[error("file is {size} bytes, below the {minimum} byte minimum")]
    TooSmall { size: u64, minimum: u64 },

    #[error("image failed to decode: {0}")]
    Corrupt(String),

    #[error("cannot read file: {0}")]
    Unreadable(String),
}

pub fn has_allowed_extension(path: &Path, config: &ValidationConfig) -> Result<(), ValidationError> {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .ok_or(ValidationError::MissingExtension)?;
    if config.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedExtension(ext))
    }
}

/// Check extension, size, and decodability of `path`.
///
/// Decoding reads the whole image, so call this from a blocking context.
pub fn validate_image(path: &Path, config: &ValidationConfig) -> Result<(), ValidationError> {
    has_allowed_extension(path, config)?;

    let meta = std::fs::metadata(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => ValidationError::NotFound,
        kind => ValidationError::Unreadable(kind.to_string()),
    })?;
    if !meta.is_file() {
        return Err(ValidationError::NotAFile);
    }

    let size = meta.len();
    if size == 0 {
        return Err(ValidationError::Empty);
    }
    if size < config.min_file_size {
        return Err(ValidationError::TooSmall {
            size,
            minimum: config.min_file_size,
        });
    }

    let reader = ImageReader::open(path)
        .map_err(|err| ValidationError::Unreadable(err.kind().to_string()))?
        .with_guessed_format()
        .map_err(|err| ValidationError::Unreadable(err.kind().to_string()))?;
    reader
        .decode()
        .map(|_| ())
        .map_err(|err| ValidationError::Corrupt(err.to_string()))
}
