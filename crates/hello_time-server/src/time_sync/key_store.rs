// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Per-device key lookup with a shared TTL cache.
//!
//! [`CachedKeyStore`] implements the [`KeyStore`] contract over any raw
//! [`KeyBackend`]. Found keys are cached for the configured TTL in a sharded
//! [`DashMap`]; no shard lock is held while the backend is queried. A lookup that
//! finds nothing is not cached, so a freshly provisioned key is visible on the
//! next request.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::KeyStoreError;

/// Where a key came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyProvenance {
    /// The backend holds a key for the device.
    Found,
    /// The backend had no record and the fallback key was substituted.
    Default,
}

/// Key material for one device.
#[derive(Clone, Eq, PartialEq)]
pub struct KeyRecord {
    key: Vec<u8>,
    provenance: KeyProvenance,
}

impl KeyRecord {
    /// A key the backend holds for the device.
    pub fn found(key: Vec<u8>) -> Self {
        KeyRecord {
            key,
            provenance: KeyProvenance::Found,
        }
    }

    /// The fallback key.
    pub fn fallback(key: Vec<u8>) -> Self {
        KeyRecord {
            key,
            provenance: KeyProvenance::Default,
        }
    }

    /// Raw key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Where the key came from.
    pub fn provenance(&self) -> KeyProvenance {
        self.provenance
    }
}

// Keys never appear in logs.
impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("len", &self.key.len())
            .field("provenance", &self.provenance)
            .finish()
    }
}

/// The key lookup contract used by the key resolver.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Lenient lookup: a device without a record gets the fallback key.
    async fn get(&self, device_id: &str) -> Result<KeyRecord, KeyStoreError>;

    /// Strict lookup: a device without a record gets `None`.
    async fn get_strict(&self, device_id: &str) -> Result<Option<KeyRecord>, KeyStoreError>;
}

/// Raw storage for device keys.
#[async_trait]
pub trait KeyBackend: Send + Sync {
    /// Fetch the key stored for `device_id`, if any.
    async fn fetch(&self, device_id: &str) -> Result<Option<Vec<u8>>, KeyStoreError>;
}

/// Key backend held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryKeyBackend {
    keys: HashMap<String, Vec<u8>>,
}

impl InMemoryKeyBackend {
    /// Build from a device id → key table.
    pub fn new(keys: HashMap<String, Vec<u8>>) -> Self {
        InMemoryKeyBackend { keys }
    }

    /// Add or replace the key for one device.
    pub fn with_key(mut self, device_id: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(device_id.into(), key.into());
        self
    }
}

#[async_trait]
impl KeyBackend for InMemoryKeyBackend {
    async fn fetch(&self, device_id: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        Ok(self.keys.get(device_id).cloned())
    }
}

#[derive(Clone)]
struct CachedKey {
    record: KeyRecord,
    expires_at: Instant,
}

/// A [`KeyStore`] that caches backend answers for a fixed TTL.
pub struct CachedKeyStore<B> {
    backend: B,
    cache: DashMap<String, CachedKey>,
    ttl: Duration,
    call_timeout: Duration,
    default_key: Vec<u8>,
}

impl<B: KeyBackend> CachedKeyStore<B> {
    /// Wrap `backend` with a cache of the given TTL.
    ///
    /// `call_timeout` bounds every backend query; `default_key` is served by lenient
    /// lookups when the backend has no record.
    pub fn new(backend: B, ttl: Duration, call_timeout: Duration, default_key: Vec<u8>) -> Self {
        CachedKeyStore {
            backend,
            cache: DashMap::new(),
            ttl,
            call_timeout,
            default_key,
        }
    }

    /// Number of cached entries, fresh or stale.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.cache.retain(|_, entry| entry.expires_at > now);
    }

    /// Purge expired entries every `interval` until the store is dropped.
    pub fn spawn_purger(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()>
    where
        B: 'static,
    {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else { break };
                let before = store.cached_len();
                store.purge_expired();
                debug!(purged = before.saturating_sub(store.cached_len()), "action=purge-key-cache");
            }
        })
    }

    fn cached(&self, device_id: &str) -> Option<KeyRecord> {
        // Clone out and release the shard guard before anything else happens.
        let entry = self.cache.get(device_id).map(|e| e.value().clone())?;
        if entry.expires_at > Instant::now() {
            Some(entry.record)
        } else {
            None
        }
    }

    async fn load(&self, device_id: &str) -> Result<Option<KeyRecord>, KeyStoreError> {
        if let Some(record) = self.cached(device_id) {
            return Ok(Some(record));
        }

        let fetched = tokio::time::timeout(self.call_timeout, self.backend.fetch(device_id))
            .await
            .map_err(|_| {
                warn!(device_id, "action=fetch-key error=timeout");
                KeyStoreError::Timeout
            })??;

        match fetched {
            Some(key) => {
                let record = KeyRecord::found(key);
                self.cache.insert(
                    device_id.to_string(),
                    CachedKey {
                        record: record.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                Ok(Some(record))
            }
            None => {
                debug!(device_id, "action=fetch-key result=missing");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<B: KeyBackend> KeyStore for CachedKeyStore<B> {
    async fn get(&self, device_id: &str) -> Result<KeyRecord, KeyStoreError> {
        Ok(self
            .load(device_id)
            .await?
            .unwrap_or_else(|| KeyRecord::fallback(self.default_key.clone())))
    }

    async fn get_strict(&self, device_id: &str) -> Result<Option<KeyRecord>, KeyStoreError> {
        self.load(device_id).await
    }
}
