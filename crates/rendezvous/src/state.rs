// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::config::BridgeConfig;
use crate::query::QueryBridge;
use crate::registry::Registry;

/// Shared bridge state.
pub struct BridgeState {
    pub registry: Arc<Registry>,
    pub cache: Arc<Cache>,
    pub query: QueryBridge,
    pub config: BridgeConfig,
    pub shutdown: CancellationToken,
}

impl BridgeState {
    pub fn new(config: BridgeConfig, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(Registry::new());
        let cache = Arc::new(Cache::new());
        let query = QueryBridge::new(Arc::clone(&registry), Arc::clone(&cache), config.cache_ttl());
        Self { registry, cache, query, config, shutdown }
    }
}
