// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the bridge.

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::BridgeState;

/// Build the axum `Router` with all bridge routes.
pub fn build_router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        // Agent side
        .route("/register", post(http::register))
        .route("/connect", get(ws::connect_handler))
        // Caller side
        .route("/query/{client_id}", get(http::query))
        // Operator surface
        .route("/clients", get(http::list_clients))
        .route("/clients/{client_id}", delete(http::disconnect_client))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
