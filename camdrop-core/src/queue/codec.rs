//! Compression framing for stored payloads.
//!
//! Large payloads are stored as `ZLIB:` followed by base64 of the deflated
//! body. Anything without the marker is read as-is, so entries written before
//! compression was enabled stay readable.

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{IngestError, Result};

pub const COMPRESSION_MARKER: &str = "ZLIB:";

/// Frame `raw` for storage. Compresses only when `raw` is longer than
/// `threshold` bytes and the framed form comes out strictly shorter.
pub fn encode_payload(raw: &str, threshold: usize) -> String {
    if raw.len() <= threshold {
        return raw.to_string();
    }

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    let compressed = match encoder.write_all(raw.as_bytes()).and_then(|_| encoder.finish()) {
        Ok(bytes) => bytes,
        Err(_) => return raw.to_string(),
    };

    let framed = format!("{COMPRESSION_MARKER}{}", STANDARD.encode(compressed));
    if framed.len() < raw.len() {
        framed
    } else {
        raw.to_string()
    }
}

/// Inverse of [`encode_payload`]; accepts framed and unframed input.
pub fn decode_payload(stored: &str) -> Result<String> {
    let Some(body) = stored.strip_prefix(COMPRESSION_MARKER) else {
        return Ok(stored.to_string());
    };

    let compressed = STANDARD
        .decode(body)
        .map_err(|err| IngestError::Decode(format!("invalid base64 body: {err}")))?;
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut raw = String::new();
    decoder
        .read_to_string(&mut raw)
        .map_err(|err| IngestError::Decode(format!("invalid zlib body: {err}")))?;
    Ok(raw)
}

pub fn is_compressed(stored: &str) -> bool {
    stored.starts_with(COMPRESSION_MARKER)
}
