use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{BoundedPush, EvictingPush, KeyTtl, MarkerStore, QueueBackend};
use crate::error::Result;

/// Process-local store mirroring the Redis semantics the pipeline relies on.
///
/// Each trait method takes the lock once, which makes every operation atomic
/// with respect to other callers, matching the single-command guarantees of
/// the Redis implementation. Expiry uses the Tokio clock so tests can pause
/// and advance time.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    lists: HashMap<String, VecDeque<String>>,
    markers: HashMap<String, Marker>,
}

struct Marker {
    value: String,
    expires_at: Option<Instant>,
}

impl Marker {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

impl StoreState {
    fn live_marker(&mut self, key: &str) -> Option<&mut Marker> {
        let now = Instant::now();
        let expired = self.markers.get(key).is_some_and(|marker| !marker.is_live(now));
        if expired {
            self.markers.remove(key);
        }
        self.markers.get_mut(key)
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryStore");
        match self.state.try_lock() {
            Some(state) => {
                debug
                    .field("lists", &state.lists.len())
                    .field("markers", &state.markers.len());
            }
            None => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a marker without an expiry, the shape left behind by an
    /// interrupted write.
    pub fn insert_persistent(&self, key: &str, value: &str) {
        self.state.lock().markers.insert(
            key.to_string(),
            Marker {
                value: value.to_string(),
                expires_at: None,
            },
        );
    }

    pub fn marker_value(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock();
        state.live_marker(key).map(|marker| marker.value.clone())
    }
}

#[async_trait]
impl QueueBackend for InMemoryStore {
    async fn len(&self, queue: &str) -> Result<usize> {
        Ok(self.state.lock().lists.get(queue).map_or(0, VecDeque::len))
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<usize> {
        let mut state = self.state.lock();
        let list = state.lists.entry(queue.to_string()).or_default();
        list.push_back(payload.to_string());
        Ok(list.len())
    }

    async fn push_bounded(
        &self,
        queue: &str,
        payload: &str,
        max_len: usize,
    ) -> Result<BoundedPush> {
        let mut state = self.state.lock();
        let list = state.lists.entry(queue.to_string()).or_default();
        if list.len() >= max_len {
            return Ok(BoundedPush::Full(list.len()));
        }
        list.push_back(payload.to_string());
        Ok(BoundedPush::Pushed(list.len()))
    }

    async fn push_evicting(
        &self,
        queue: &str,
        payload: &str,
        max_len: usize,
    ) -> Result<EvictingPush> {
        let mut state = self.state.lock();
        let list = state.lists.entry(queue.to_string()).or_default();
        let mut evicted = 0;
        while !list.is_empty() && list.len() >= max_len {
            list.pop_front();
            evicted += 1;
        }
        list.push_back(payload.to_string());
        Ok(EvictingPush {
            length: list.len(),
            evicted,
        })
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .lists
            .get_mut(queue)
            .and_then(VecDeque::pop_front))
    }

    async fn range(&self, queue: &str, start: usize, stop: usize) -> Result<Vec<String>> {
        let state = self.state.lock();
        let Some(list) = state.lists.get(queue) else {
            return Ok(Vec::new());
        };
        if stop < start {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start)
            .take((stop - start).saturating_add(1))
            .cloned()
            .collect())
    }

    async fn clear(&self, queue: &str) -> Result<()> {
        self.state.lock().lists.remove(queue);
        Ok(())
    }
}

#[async_trait]
impl MarkerStore for InMemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        if state.live_marker(key).is_some() {
            return Ok(false);
        }
        state.markers.insert(
            key.to_string(),
            Marker {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut state = self.state.lock();
        let now = Instant::now();
        Ok(match state.live_marker(key) {
            None => KeyTtl::Missing,
            Some(Marker {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Marker {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        match state.live_marker(key) {
            Some(marker) => {
                marker.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.markers.retain(|_, marker| marker.is_live(now));
        let mut keys: Vec<String> = state
            .markers
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(marker) = state.markers.remove(key)
                && marker.is_live(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn markers_expire_on_the_tokio_clock() {
        let store = InMemoryStore::new();
        assert!(
            store
                .set_if_absent("k", "v", Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_if_absent("k", "v", Duration::from_secs(10))
                .await
                .unwrap()
        );

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
        assert!(
            store
                .set_if_absent("k", "v", Duration::from_secs(10))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn persistent_markers_report_no_ttl() {
        let store = InMemoryStore::new();
        store.insert_persistent("orphan", "x");
        assert_eq!(store.ttl("orphan").await.unwrap(), KeyTtl::Persistent);
        assert!(store.expire("orphan", Duration::from_secs(5)).await.unwrap());
        assert!(matches!(
            store.ttl("orphan").await.unwrap(),
            KeyTtl::Expires(_)
        ));
    }

    #[tokio::test]
    async fn evicting_push_keeps_newest_entries() {
        let store = InMemoryStore::new();
        for item in ["a", "b", "c"] {
            store.push("q", item).await.unwrap();
        }
        let outcome = store.push_evicting("q", "d", 2).await.unwrap();
        assert_eq!(outcome, EvictingPush { length: 2, evicted: 2 });
        assert_eq!(store.range("q", 0, 10).await.unwrap(), vec!["c", "d"]);
    }

    #[tokio::test]
    async fn bounded_push_refuses_when_full() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.push_bounded("q", "a", 1).await.unwrap(),
            BoundedPush::Pushed(1)
        );
        assert_eq!(
            store.push_bounded("q", "b", 1).await.unwrap(),
            BoundedPush::Full(1)
        );
        assert_eq!(store.len("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn range_matches_lrange_bounds() {
        let store = InMemoryStore::new();
        for item in ["a", "b", "c"] {
            store.push("q", item).await.unwrap();
        }
        assert_eq!(store.range("q", 1, 1).await.unwrap(), vec!["b"]);
        assert_eq!(store.range("q", 1, 5).await.unwrap(), vec!["b", "c"]);
        assert!(store.range("q", 2, 1).await.unwrap().is_empty());
        assert!(store.range("q", 5, 9).await.unwrap().is_empty());
    }
}
