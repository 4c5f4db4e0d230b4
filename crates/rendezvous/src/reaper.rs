// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background sweep that evicts idle connections and purges old cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::Cache;
use crate::registry::Registry;
use crate::state::BridgeState;

/// Result of one sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub evicted: Vec<String>,
    pub purged: Vec<String>,
}

/// Run a single sweep as of `now`.
///
/// Connections idle for longer than `idle_timeout` are removed and closed.
/// With a `retention`, cached payloads older than it are dropped unless the
/// client still has a live connection.
pub async fn reap_once(
    registry: &Registry,
    cache: &Cache,
    now: Instant,
    idle_timeout: Duration,
    retention: Option<Duration>,
) -> ReapReport {
    let evicted_handles = registry
        .sweep(|_, _, last_activity| now.saturating_duration_since(last_activity) <= idle_timeout)
        .await;

    let mut evicted = Vec::with_capacity(evicted_handles.len());
    for handle in evicted_handles {
        // Closing is idempotent; the connection task may already be tearing down.
        handle.close();
        tracing::info!(
            client_id = %handle.client_id,
            conn_id = %handle.conn_id,
            idle_ms = handle.idle_for(now).as_millis() as u64,
            "client was inactive and was disconnected"
        );
        evicted.push(handle.client_id.clone());
    }

    let purged = match retention {
        Some(max_age) => {
            let live = registry.ids().await;
            let purged = cache.purge(now, max_age, |id| live.contains(id)).await;
            if !purged.is_empty() {
                tracing::debug!(count = purged.len(), "purged stale cache entries");
            }
            purged
        }
        None => Vec::new(),
    };

    ReapReport { evicted, purged }
}

/// Spawn the periodic reaper. Stops when the bridge shuts down.
pub fn spawn_reaper(state: Arc<BridgeState>) -> JoinHandle<()> {
    let interval = state.config.reap_interval();
    let idle_timeout = state.config.idle_timeout();
    let retention = state.config.cache_retention();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let now = Instant::now();
            let report = reap_once(&state.registry, &state.cache, now, idle_timeout, retention).await;
            if !report.evicted.is_empty() {
                tracing::debug!(evicted = report.evicted.len(), "reaper sweep complete");
            }
        }
    })
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
