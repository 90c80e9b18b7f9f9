use std::fmt;

use async_trait::async_trait;
use camdrop_core::{CameraDirectory, NewCamera, Result};
use redis::aio::ConnectionManager;
use tracing::{debug, info};

pub const DEFAULT_CAMERA_HASH: &str = "camdrop:cameras";

/// Records cameras in a Redis hash keyed by camera id.
///
/// Uses `HSETNX` so a record written by another instance, or edited by an
/// operator, is never overwritten.
#[derive(Clone)]
pub struct RedisCameraDirectory {
    conn: ConnectionManager,
    key: String,
}

impl fmt::Debug for RedisCameraDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCameraDirectory")
            .field("key", &self.key)
            .finish()
    }
}

impl RedisCameraDirectory {
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_key(conn, DEFAULT_CAMERA_HASH)
    }

    pub fn with_key(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl CameraDirectory for RedisCameraDirectory {
    async fn create_camera(&self, camera: &NewCamera) -> Result<()> {
        let record = serde_json::to_string(camera)?;
        let mut conn = self.conn.clone();
        let created: bool = redis::cmd("HSETNX")
            .arg(&self.key)
            .arg(&camera.id)
            .arg(record)
            .query_async(&mut conn)
            .await?;

        if created {
            info!(camera_id = %camera.id, display_name = %camera.display_name, "camera record created");
        } else {
            debug!(camera_id = %camera.id, "camera record already present");
        }
        Ok(())
    }
}
