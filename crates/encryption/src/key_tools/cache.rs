// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Cache of unwrapped data keys.
//!
//! An LRU cache with TTL, keyed by key metadata, that keeps repeated lookups
//! of the same key (one per row group) from reaching the KMS.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::crypto::SecureKey;

const DEFAULT_CAPACITY: usize = 1000;

/// A cached key with expiration time.
struct CachedKey {
    key: SecureKey,
    expires_at: Instant,
}

/// LRU cache of unwrapped keys with TTL support.
///
/// # Thread Safety
/// This cache is thread-safe and can be shared across readers using `Arc`.
pub struct KeyCache {
    cache: Mutex<LruCache<Vec<u8>, CachedKey>>,
    ttl: Duration,
}

impl KeyCache {
    /// Creates a cache holding up to 1000 keys for `ttl` each.
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(
            ttl,
            NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN),
        )
    }

    /// Creates a cache with the specified TTL and capacity.
    pub fn with_capacity(ttl: Duration, capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns the key cached under `key_metadata` unless it has expired.
    pub fn get(&self, key_metadata: &[u8]) -> Option<SecureKey> {
        let mut cache = self.cache.lock();

        if let Some(cached) = cache.get(key_metadata) {
            if cached.expires_at > Instant::now() {
                return Some(cached.key.clone());
            }
            cache.pop(key_metadata);
        }

        None
    }

    /// Caches `key` under `key_metadata`.
    pub fn insert(&self, key_metadata: Vec<u8>, key: SecureKey) {
        self.cache.lock().put(key_metadata, CachedKey {
            key,
            expires_at: Instant::now() + self.ttl,
        });
    }

    /// Removes all expired entries.
    pub fn evict_expired(&self) {
        let mut cache = self.cache.lock();
        let now = Instant::now();

        // LruCache has no retain.
        let expired: Vec<Vec<u8>> = cache
            .iter()
            .filter(|(_, v)| v.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        for key_metadata in expired {
            cache.pop(&key_metadata);
        }
    }

    /// Clears all entries.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}
