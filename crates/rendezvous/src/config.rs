// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the rendezvous bridge.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "rendezvous", version, about = "Pull-to-push rendezvous bridge for remote agents")]
pub struct BridgeConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "RENDEZVOUS_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "RENDEZVOUS_PORT")]
    pub port: u16,

    /// How long a cached payload may be served without a live fetch.
    #[arg(long, default_value_t = 5000, env = "RENDEZVOUS_CACHE_TTL_MS")]
    pub cache_ttl_ms: u64,

    /// Upper bound on a live fetch round-trip. Requests may ask for less.
    #[arg(long, default_value_t = 10000, env = "RENDEZVOUS_QUERY_TIMEOUT_MS")]
    pub query_timeout_ms: u64,

    /// Reaper sweep period in milliseconds.
    #[arg(long, default_value_t = 60000, env = "RENDEZVOUS_REAP_INTERVAL_MS")]
    pub reap_interval_ms: u64,

    /// Connections idle longer than this are evicted by the reaper.
    #[arg(long, default_value_t = 120000, env = "RENDEZVOUS_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// Cached payloads of disconnected agents older than this are purged. 0 keeps them forever.
    #[arg(long, default_value_t = 600000, env = "RENDEZVOUS_CACHE_RETENTION_MS")]
    pub cache_retention_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "RENDEZVOUS_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "RENDEZVOUS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl BridgeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache_ttl_ms == 0 {
            anyhow::bail!("--cache-ttl-ms must be greater than zero");
        }
        if self.query_timeout_ms == 0 {
            anyhow::bail!("--query-timeout-ms must be greater than zero");
        }
        if self.reap_interval_ms == 0 {
            anyhow::bail!("--reap-interval-ms must be greater than zero");
        }
        if self.idle_timeout_ms == 0 {
            anyhow::bail!("--idle-timeout-ms must be greater than zero");
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("unknown log format: {other} (expected json or text)"),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// `None` when retention purging is disabled.
    pub fn cache_retention(&self) -> Option<Duration> {
        match self.cache_retention_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Clamp a caller-requested timeout to the configured maximum.
    pub fn request_timeout(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms.min(self.query_timeout_ms)),
            _ => self.query_timeout(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
