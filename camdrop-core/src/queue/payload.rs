use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Work item handed to the downstream detection workers.
///
/// Immutable once built; `pipeline_start_time` mirrors `timestamp` so
/// consumers can measure end-to-end latency from detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuePayload {
    pub camera_id: String,
    pub file_path: PathBuf,
    /// When the file event was observed.
    pub timestamp: DateTime<Utc>,
    pub pipeline_start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl QueuePayload {
    pub fn new(
        camera_id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            file_path: file_path.into(),
            timestamp: detected_at,
            pipeline_start_time: detected_at,
            file_hash: None,
            metadata: Map::new(),
        }
    }

    pub fn with_file_hash(mut self, hash: Option<String>) -> Self {
        self.file_hash = hash;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one admission attempt. Capacity problems are reported here
/// rather than as errors because a full queue is a normal operating state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAdmissionResult {
    pub success: bool,
    pub queue_length: usize,
    pub moved_to_dlq_count: usize,
    /// Entries dropped from the head by the `drop_oldest` policy.
    pub evicted_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueAdmissionResult {
    pub fn admitted(queue_length: usize) -> Self {
        Self {
            success: true,
            queue_length,
            ..Self::default()
        }
    }

    pub fn rejected(queue_length: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            queue_length,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_warning(mut self, warning: Option<String>) -> Self {
        self.warning = warning;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_fields() {
        let at = DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = QueuePayload::new("front_door", "/srv/ftp/Front Door/a.jpg", at)
            .with_file_hash(Some("ab".repeat(32)));
        let json: Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["camera_id"], "front_door");
        assert_eq!(json["file_path"], "/srv/ftp/Front Door/a.jpg");
        assert_eq!(json["timestamp"], json["pipeline_start_time"]);
        assert_eq!(json["file_hash"].as_str().map(str::len), Some(64));
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn hash_is_omitted_when_absent() {
        let payload = QueuePayload::new("cam", "/x.jpg", Utc::now());
        let json: Value = serde_json::to_value(&payload).unwrap();
        assert!(json.get("file_hash").is_none());
    }
}
