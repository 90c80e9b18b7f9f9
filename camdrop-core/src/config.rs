//! Runtime configuration for the ingest pipeline.
//!
//! Built once at startup and handed to each component by value or reference.
//! All fields carry defaults so a deployment only needs to supply the knobs it
//! wants to change.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory observer and debounce settings.
    pub watch: WatchConfig,
    /// Upload stability probing.
    pub stability: StabilityConfig,
    /// Image validation thresholds.
    pub validation: ValidationConfig,
    /// Content-hash deduplication.
    pub dedupe: DedupeConfig,
    /// Queue sizing, overflow policy, and payload framing.
    pub queue: QueueConfig,
    /// Circuit breaker guarding dead-letter writes.
    pub breaker: BreakerConfig,
    /// Camera record creation.
    pub camera: CameraConfig,
}

impl IngestConfig {
    /// Reject values that would make the pipeline misbehave instead of
    /// failing later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.watch.root.as_os_str().is_empty() {
            return Err(IngestError::Configuration("watch.root must not be empty".into()));
        }
        if self.watch.use_polling && self.watch.poll_interval_ms == 0 {
            return Err(IngestError::Configuration(
                "watch.poll_interval_ms must be positive when polling".into(),
            ));
        }
        if self.stability.max_attempts == 0 {
            return Err(IngestError::Configuration(
                "stability.max_attempts must be at least 1".into(),
            ));
        }
        if self.stability.poll_interval_ms == 0 {
            return Err(IngestError::Configuration(
                "stability.poll_interval_ms must be positive".into(),
            ));
        }
        if self.queue.max_size == 0 {
            return Err(IngestError::Configuration("queue.max_size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.queue.backpressure_threshold) {
            return Err(IngestError::Configuration(format!(
                "queue.backpressure_threshold must be within 0.0..=1.0, got {}",
                self.queue.backpressure_threshold
            )));
        }
        if self.queue.name.trim().is_empty() {
            return Err(IngestError::Configuration("queue.name must not be empty".into()));
        }
        if self.queue.dead_letter_queue() == self.queue.name {
            return Err(IngestError::Configuration(
                "dead-letter queue must differ from the primary queue".into(),
            ));
        }
        if self.dedupe.enabled && self.dedupe.ttl_secs == 0 {
            return Err(IngestError::Configuration(
                "dedupe.ttl_secs must be positive when dedupe is enabled".into(),
            ));
        }
        if self.camera.registration_timeout_ms == 0 {
            return Err(IngestError::Configuration(
                "camera.registration_timeout_ms must be positive".into(),
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.half_open_max_calls == 0 {
            return Err(IngestError::Configuration(
                "breaker thresholds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Root of the FTP upload tree. Each first-level folder is one camera.
    pub root: PathBuf,
    /// Delay before a path is processed; later events for the same path restart it.
    pub debounce_ms: u64,
    /// Use fixed-interval polling instead of native notifications (network mounts).
    pub use_polling: bool,
    /// Polling cadence in milliseconds when `use_polling` is set.
    pub poll_interval_ms: u64,
    /// Schedule files already present under the root when the observer starts.
    pub scan_existing_on_start: bool,
    /// Capacity of the channel between the notify thread and the runtime.
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/srv/ftp/uploads"),
            debounce_ms: 500,
            use_polling: false,
            poll_interval_ms: 1_000,
            scan_existing_on_start: false,
            channel_capacity: 4_096,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// How long size and mtime must stay unchanged before a file counts as complete.
    pub window_ms: u64,
    /// Delay between samples.
    pub poll_interval_ms: u64,
    /// Upper bound on samples; gives every probe a hard deadline.
    pub max_attempts: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window_ms: 2_000,
            poll_interval_ms: 500,
            max_attempts: 60,
        }
    }
}

impl StabilityConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Files smaller than this are treated as FTP fragments.
    pub min_file_size: u64,
    /// Accepted extensions, lowercase, without the leading dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_file_size: 10 * 1024,
            allowed_extensions: ["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    pub enabled: bool,
    /// Lifetime of a dedupe marker.
    pub ttl_secs: u64,
    /// TTL assigned to markers found without one.
    pub orphan_ttl_secs: u64,
    /// Key namespace for markers in the shared store.
    pub key_prefix: String,
    /// Upper bound for a single store round-trip.
    pub operation_timeout_ms: u64,
    /// Cadence of the orphan sweep.
    pub cleanup_interval_secs: u64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            orphan_ttl_secs: 3_600,
            key_prefix: "camdrop:dedupe:".to_string(),
            operation_timeout_ms: 2_000,
            cleanup_interval_secs: 600,
        }
    }
}

impl DedupeConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_ttl_secs.max(1))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// What to do with a new payload when the primary queue is full.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Divert the new payload to the dead-letter queue.
    #[default]
    Dlq,
    /// Refuse the payload; the caller treats this as a hard failure.
    Reject,
    /// Evict the oldest queued payloads to make room. Lossy.
    DropOldest,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::Dlq => "dlq",
            OverflowPolicy::Reject => "reject",
            OverflowPolicy::DropOldest => "drop_oldest",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dlq" => Ok(OverflowPolicy::Dlq),
            "reject" => Ok(OverflowPolicy::Reject),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(IngestError::Configuration(format!(
                "unknown overflow policy `{other}` (expected dlq, reject, or drop_oldest)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Primary queue receiving admitted payloads.
    pub name: String,
    /// Explicit dead-letter queue name; defaults to `<name>:dlq`.
    pub dead_letter_name: Option<String>,
    /// Hard capacity of the primary queue.
    pub max_size: usize,
    /// Fraction of `max_size` at which admissions start carrying a warning.
    pub backpressure_threshold: f64,
    pub overflow_policy: OverflowPolicy,
    /// Serialized payloads longer than this many bytes are compressed.
    pub compression_threshold: usize,
    /// Upper bound for a single store round-trip.
    pub operation_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "camdrop:detection".to_string(),
            dead_letter_name: None,
            max_size: 1_000,
            backpressure_threshold: 0.8,
            overflow_policy: OverflowPolicy::Dlq,
            compression_threshold: 1_024,
            operation_timeout_ms: 5_000,
        }
    }
}

impl QueueConfig {
    pub fn dead_letter_queue(&self) -> String {
        dead_letter_name_for(&self.name, self.dead_letter_name.as_deref())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms.max(1))
    }
}

pub(crate) fn dead_letter_name_for(queue: &str, explicit: Option<&str>) -> String {
    match explicit {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => format!("{queue}:dlq"),
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before probing again.
    pub recovery_timeout_ms: u64,
    /// Probe calls admitted while half-open.
    pub half_open_max_calls: u32,
    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Upper bound for one camera record creation.
    pub registration_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            registration_timeout_ms: 5_000,
        }
    }
}

impl CameraConfig {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}
