//! Content-hash deduplication backed by expiring markers.
//!
//! A marker `<prefix><fingerprint>` exists while the content counts as already
//! processed. Check and mark happen in one `set_if_absent` call so two
//! near-simultaneous events for the same content cannot both pass.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DedupeConfig;
use crate::error::{Result, with_timeout};
use crate::hasher::fingerprint_file;
use crate::sanitize::sanitize_error_message;
use crate::store::{KeyTtl, MarkerStore};

/// Result of [`DedupeCache::is_duplicate_and_mark`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DedupeCheck {
    pub is_duplicate: bool,
    /// `None` when the file could not be fingerprinted.
    pub fingerprint: Option<String>,
}

impl DedupeCheck {
    fn fresh(fingerprint: Option<String>) -> Self {
        Self {
            is_duplicate: false,
            fingerprint,
        }
    }
}

pub struct DedupeCache {
    store: Arc<dyn MarkerStore>,
    config: DedupeConfig,
}

impl fmt::Debug for DedupeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupeCache")
            .field("config", &self.config)
            .field("store_type", &std::any::type_name_of_val(self.store.as_ref()))
            .finish()
    }
}

impl DedupeCache {
    pub fn new(store: Arc<dyn MarkerStore>, config: DedupeConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &DedupeConfig {
        &self.config
    }

    pub fn marker_key(&self, fingerprint: &str) -> String {
        format!("{}{}", self.config.key_prefix, fingerprint)
    }

    /// Fingerprint `path` and atomically record it.
    ///
    /// Unavailable fingerprints and store failures both report "not a
    /// duplicate": dedupe is an optimisation and must not block admission.
    pub async fn is_duplicate_and_mark(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> DedupeCheck {
        let Some(fingerprint) = fingerprint_file(path, cancel).await else {
            return DedupeCheck::fresh(None);
        };

        let source = path.to_string_lossy();
        match self.mark(&fingerprint, &source).await {
            Ok(created) => DedupeCheck {
                is_duplicate: !created,
                fingerprint: Some(fingerprint),
            },
            Err(err) => {
                warn!(
                    fingerprint = %fingerprint,
                    "dedupe store unavailable, treating file as new: {}",
                    sanitize_error_message(&err.to_string())
                );
                DedupeCheck::fresh(Some(fingerprint))
            }
        }
    }

    /// Returns whether a new marker was created. An existing marker without
    /// an expiry is healed on the way through.
    pub async fn mark(&self, fingerprint: &str, source: &str) -> Result<bool> {
        let key = self.marker_key(fingerprint);
        let timeout = self.config.operation_timeout();

        let created = with_timeout(
            "dedupe mark",
            timeout,
            self.store.set_if_absent(&key, source, self.config.ttl()),
        )
        .await?;

        if !created {
            debug!(fingerprint, "duplicate content detected");
            if let Err(err) = self.heal_if_orphaned(&key).await {
                debug!("orphan check failed for {key}: {err}");
            }
        }

        Ok(created)
    }

    /// Drop the marker for `fingerprint`, e.g. after admission failed so a
    /// retry of the same content is not misclassified.
    pub async fn release(&self, fingerprint: &str) -> Result<bool> {
        let key = self.marker_key(fingerprint);
        let removed = with_timeout(
            "dedupe release",
            self.config.operation_timeout(),
            self.store.delete(std::slice::from_ref(&key)),
        )
        .await?;
        Ok(removed > 0)
    }

    /// Give every marker without an expiry the configured orphan TTL.
    /// Returns the number of markers healed.
    pub async fn cleanup_orphaned_keys(&self) -> Result<usize> {
        let keys = with_timeout(
            "dedupe scan",
            self.config.operation_timeout(),
            self.store.keys_with_prefix(&self.config.key_prefix),
        )
        .await?;

        let mut healed = 0;
        for key in &keys {
            if self.heal_if_orphaned(key).await? {
                healed += 1;
            }
        }

        if healed > 0 {
            info!(healed, scanned = keys.len(), "assigned TTL to orphaned dedupe markers");
        } else {
            debug!(scanned = keys.len(), "no orphaned dedupe markers");
        }
        Ok(healed)
    }

    /// Remove every marker under the configured prefix.
    pub async fn clear(&self) -> Result<usize> {
        let timeout = self.config.operation_timeout();
        let keys = with_timeout(
            "dedupe scan",
            timeout,
            self.store.keys_with_prefix(&self.config.key_prefix),
        )
        .await?;
        let removed = with_timeout("dedupe clear", timeout, self.store.delete(&keys)).await?;
        warn!(removed, "cleared dedupe markers");
        Ok(removed)
    }

    /// Periodically run [`Self::cleanup_orphaned_keys`] until `shutdown` fires.
    pub fn spawn_orphan_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cleanup_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.cleanup_orphaned_keys().await {
                            warn!(
                                "orphan sweep failed: {}",
                                sanitize_error_message(&err.to_string())
                            );
                        }
                    }
                }
            }
            debug!("orphan sweeper stopped");
        })
    }

    async fn heal_if_orphaned(&self, key: &str) -> Result<bool> {
        let timeout = self.config.operation_timeout();
        match with_timeout("dedupe ttl", timeout, self.store.ttl(key)).await? {
            KeyTtl::Persistent => {
                let applied = with_timeout(
                    "dedupe expire",
                    timeout,
                    self.store.expire(key, self.config.orphan_ttl()),
                )
                .await?;
                if applied {
                    warn!(key, "dedupe marker had no TTL, assigned orphan TTL");
                }
                Ok(applied)
            }
            KeyTtl::Missing | KeyTtl::Expires(_) => Ok(false),
        }
    }
}
