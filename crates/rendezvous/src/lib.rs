// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rendezvous: pull-to-push bridge between HTTP callers and connected agents.
//!
//! Agents hold a WebSocket open to the bridge and push data whenever they
//! like. Callers pull an agent's current data over plain HTTP; the bridge
//! answers from a short-lived cache or round-trips a fetch directive over
//! the agent's socket.

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod query;
pub mod reaper;
pub mod registry;
pub mod state;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::reaper::spawn_reaper;
use crate::state::BridgeState;
use crate::transport::build_router;

/// Run the bridge until Ctrl-C.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    serve(listener, config, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    config: BridgeConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    config.validate()?;
    let addr = listener.local_addr()?;
    let state = Arc::new(BridgeState::new(config, shutdown.clone()));

    let reaper = spawn_reaper(Arc::clone(&state));
    let router = build_router(Arc::clone(&state));

    tracing::info!("rendezvous listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled_owned()).await?;

    state.registry.close_all().await;
    reaper.abort();
    Ok(())
}
