use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::{BoundedPush, EvictingPush, KeyTtl, MarkerStore, QueueBackend};
use crate::error::{IngestError, Result};

static PUSH_BOUNDED: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local len = redis.call('LLEN', KEYS[1])
if len >= tonumber(ARGV[2]) then
  return {0, len}
end
return {1, redis.call('RPUSH', KEYS[1], ARGV[1])}
",
    )
});

static PUSH_EVICTING: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local len = redis.call('LLEN', KEYS[1])
local max = tonumber(ARGV[2])
local evicted = 0
if len >= max then
  evicted = len - max + 1
  redis.call('LTRIM', KEYS[1], evicted, -1)
end
return {redis.call('RPUSH', KEYS[1], ARGV[1]), evicted}
",
    )
});

const SCAN_BATCH: usize = 500;

/// Redis-backed queue lists and dedupe markers.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", crate::sanitize::redact_url(redis_url));

        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        info!("Successfully connected to Redis");

        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Connection handle for collaborators sharing this Redis instance.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn as_len(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

#[async_trait]
impl QueueBackend for RedisStore {
    async fn len(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.llen(queue).await?;
        Ok(as_len(len))
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.rpush(queue, payload).await?;
        Ok(as_len(len))
    }

    async fn push_bounded(
        &self,
        queue: &str,
        payload: &str,
        max_len: usize,
    ) -> Result<BoundedPush> {
        let mut conn = self.conn.clone();
        let (pushed, len): (i64, i64) = PUSH_BOUNDED
            .key(queue)
            .arg(payload)
            .arg(max_len)
            .invoke_async(&mut conn)
            .await?;
        debug!(queue, pushed, len, "bounded push");
        Ok(if pushed == 1 {
            BoundedPush::Pushed(as_len(len))
        } else {
            BoundedPush::Full(as_len(len))
        })
    }

    async fn push_evicting(
        &self,
        queue: &str,
        payload: &str,
        max_len: usize,
    ) -> Result<EvictingPush> {
        let mut conn = self.conn.clone();
        let (len, evicted): (i64, i64) = PUSH_EVICTING
            .key(queue)
            .arg(payload)
            .arg(max_len)
            .invoke_async(&mut conn)
            .await?;
        Ok(EvictingPush {
            length: as_len(len),
            evicted: as_len(evicted),
        })
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let item: Option<String> = redis::cmd("LPOP")
            .arg(queue)
            .query_async(&mut conn)
            .await?;
        Ok(item)
    }

    async fn range(&self, queue: &str, start: usize, stop: usize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let start = isize::try_from(start)
            .map_err(|_| IngestError::Store(format!("range start {start} out of bounds")))?;
        let stop = isize::try_from(stop).unwrap_or(-1);
        let items: Vec<String> = conn.lrange(queue, start, stop).await?;
        Ok(items)
    }

    async fn clear(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(queue).await?;
        Ok(())
    }
}

#[async_trait]
impl MarkerStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.conn.clone();
        let remaining: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(match remaining {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(Duration::from_millis(u64::try_from(ms).unwrap_or_default())),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(keys).await?;
        Ok(as_len(removed))
    }
}
