// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-facing WebSocket endpoint.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::connection::serve_connection;
use crate::error::BridgeError;
use crate::state::BridgeState;

/// Query parameters for the agent WS upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub client_id: Option<String>,
}

/// `GET /connect?client_id=<id>`: upgrade an agent connection.
pub async fn connect_handler(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<ConnectQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let client_id = match query.client_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            return BridgeError::BadRequest
                .to_http_response("client_id query parameter is required")
                .into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(client_id = %client_id, err = %rejection, "websocket upgrade rejected");
            return rejection.into_response();
        }
    };

    let failed_id = client_id.clone();
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(client_id = %failed_id, err = %e, "websocket upgrade failed");
    })
    .on_upgrade(move |socket| serve_connection(state, client_id, socket))
}
