// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Answers "give me client X's data" within a single caller request.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::cache::Cache;
use crate::error::QueryError;
use crate::registry::Registry;

pub struct QueryBridge {
    registry: Arc<Registry>,
    cache: Arc<Cache>,
    ttl: Duration,
}

impl QueryBridge {
    pub fn new(registry: Arc<Registry>, cache: Arc<Cache>, ttl: Duration) -> Self {
        Self { registry, cache, ttl }
    }

    /// Serve from cache when fresh, otherwise round-trip a fetch directive
    /// over the client's connection. All waiting stops at `deadline`.
    pub async fn query(&self, client_id: &str, deadline: Instant) -> Result<Bytes, QueryError> {
        if let Some(payload) = self.cache.get_fresh(client_id, self.ttl).await {
            tracing::debug!(client_id, "query served from cache");
            return Ok(payload);
        }

        let Some(handle) = self.registry.get(client_id).await else {
            return Err(QueryError::NotConnected);
        };

        let payload = handle.fetch(deadline).await.inspect_err(|e| {
            tracing::debug!(client_id, conn_id = %handle.conn_id, err = %e, "live fetch failed");
        })?;

        handle.touch();
        self.cache.put(client_id, payload.clone()).await;
        tracing::debug!(client_id, len = payload.len(), "query served live");
        Ok(payload)
    }
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
