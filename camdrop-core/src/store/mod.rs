//! Storage ports for the queue and the dedupe markers.
//!
//! The pipeline never takes a process-wide lock around these operations.
//! Every method that has to be race-free across producers maps onto a single
//! atomic primitive of the backing store (`SET NX PX`, a Lua script, `RPUSH`).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Remaining lifetime of a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyTtl {
    Missing,
    /// Key exists without an expiry.
    Persistent,
    Expires(Duration),
}

/// Outcome of a capacity-checked push.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BoundedPush {
    /// Payload appended; carries the new queue length.
    Pushed(usize),
    /// Queue already at capacity; carries the current length. Nothing was written.
    Full(usize),
}

/// Outcome of a push that evicts from the head to stay within capacity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EvictingPush {
    pub length: usize,
    pub evicted: usize,
}

/// FIFO lists keyed by name. The head holds the oldest entry.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn len(&self, queue: &str) -> Result<usize>;

    /// Append unconditionally, returning the new length.
    async fn push(&self, queue: &str, payload: &str) -> Result<usize>;

    /// Append only when the queue holds fewer than `max_len` entries.
    async fn push_bounded(&self, queue: &str, payload: &str, max_len: usize)
    -> Result<BoundedPush>;

    /// Append, first evicting from the head so the queue holds at most
    /// `max_len` entries afterwards.
    async fn push_evicting(
        &self,
        queue: &str,
        payload: &str,
        max_len: usize,
    ) -> Result<EvictingPush>;

    /// Remove and return the oldest entry.
    async fn pop(&self, queue: &str) -> Result<Option<String>>;

    /// Entries between `start` and `stop` inclusive, head first.
    async fn range(&self, queue: &str, start: usize, stop: usize) -> Result<Vec<String>>;

    async fn clear(&self, queue: &str) -> Result<()>;
}

/// Expiring string markers.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Create `key` with `ttl` unless it already exists. Returns whether the
    /// key was created.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// Set an expiry on an existing key. Returns false when the key is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// All keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;
}
