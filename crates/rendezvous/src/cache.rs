// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Last-known payload per client.
//!
//! Freshness is decided by the reader; the cache never expires entries on
//! lookup. Old entries only disappear when overwritten or purged.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub captured_at: Instant,
}

#[derive(Default)]
pub struct Cache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload and its age, regardless of freshness.
    pub async fn get(&self, client_id: &str) -> Option<(Bytes, Duration)> {
        let entries = self.entries.read().await;
        entries.get(client_id).map(|e| (e.payload.clone(), e.captured_at.elapsed()))
    }

    /// Payload only if it is younger than `ttl`.
    pub async fn get_fresh(&self, client_id: &str, ttl: Duration) -> Option<Bytes> {
        match self.get(client_id).await {
            Some((payload, age)) if age < ttl => Some(payload),
            _ => None,
        }
    }

    pub async fn put(&self, client_id: &str, payload: Bytes) {
        self.put_at(client_id, payload, Instant::now()).await;
    }

    pub async fn put_at(&self, client_id: &str, payload: Bytes, captured_at: Instant) {
        self.entries
            .write()
            .await
            .insert(client_id.to_owned(), CacheEntry { payload, captured_at });
    }

    pub async fn age(&self, client_id: &str) -> Option<Duration> {
        self.entries.read().await.get(client_id).map(|e| e.captured_at.elapsed())
    }

    /// Drop entries older than `max_age` (as of `now`) unless `keep` vouches
    /// for the id. Returns the purged ids.
    pub async fn purge<F>(&self, now: Instant, max_age: Duration, keep: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = self.entries.write().await;
        let mut purged = Vec::new();
        entries.retain(|id, entry| {
            let expired = now.saturating_duration_since(entry.captured_at) > max_age;
            if expired && !keep(id) {
                purged.push(id.clone());
                false
            } else {
                true
            }
        });
        purged
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
