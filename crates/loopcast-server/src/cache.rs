// SPDX-License-Identifier: Apache-2.0

use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Weak entity tag over a serialized payload: `W/"<hex sha1>"`.
#[must_use]
pub fn weak_etag(payload: &[u8]) -> String {
    let digest = Sha1::digest(payload);
    format!("W/\"{}\"", hex::encode(digest))
}

#[derive(Clone)]
struct CacheEntry {
    body: Vec<u8>,
    etag: String,
    expires_at: Instant,
}

/// In-memory response memo keyed by request fingerprint. Readers share the
/// lock; writers evict the soonest-to-expire entry once capacity is reached.
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(key)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some((entry.body.clone(), entry.etag.clone()))
    }

    pub fn set(&self, key: String, body: Vec<u8>) -> String {
        let etag = weak_etag(&body);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, v)| v.expires_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                body,
                etag: etag.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        etag
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
