// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the bridge.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{BridgeError, QueryError};
use crate::state::BridgeState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub connection_count: usize,
    pub cached_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub connection_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ClientInfo {
    pub client_id: String,
    pub conn_id: String,
    pub state: String,
    pub connected_ms: u64,
    pub idle_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_age_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub client_id: String,
    pub disconnected: bool,
}

// -- Helpers ------------------------------------------------------------------

/// Whether the request reached us over TLS (as reported by a terminating proxy).
pub fn request_is_secure(headers: &HeaderMap) -> bool {
    if let Some(proto) = headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()) {
        return proto.trim().eq_ignore_ascii_case("https");
    }
    headers
        .get(header::FORWARDED)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("proto=https"))
        .unwrap_or(false)
}

/// Build the URL an agent uses to open its connection.
pub fn connection_url(secure: bool, host: &str, client_id: &str) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{scheme}://{host}/connect?client_id={}", urlencoding::encode(client_id))
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<BridgeState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        connection_count: s.registry.len().await,
        cached_count: s.cache.len().await,
    })
}

/// `POST /register`: hand an agent its connection URL.
pub async fn register(
    State(s): State<Arc<BridgeState>>,
    headers: HeaderMap,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return BridgeError::BadRequest.to_http_response(rejection.body_text()).into_response();
        }
    };
    if req.client_id.is_empty() {
        return BridgeError::BadRequest.to_http_response("client_id is required").into_response();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{}:{}", s.config.host, s.config.port));

    let connection_url = connection_url(request_is_secure(&headers), &host, &req.client_id);
    tracing::debug!(client_id = %req.client_id, url = %connection_url, "client registered");
    Json(RegisterResponse { connection_url }).into_response()
}

/// `GET /query/{client_id}`: the client's current payload as raw bytes.
pub async fn query(
    State(s): State<Arc<BridgeState>>,
    Path(client_id): Path<String>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Response {
    let params = match params {
        Ok(Query(params)) => params,
        Err(rejection) => {
            return BridgeError::BadRequest.to_http_response(rejection.body_text()).into_response();
        }
    };
    let deadline = Instant::now() + s.config.request_timeout(params.timeout_ms);
    match s.query.query(&client_id, deadline).await {
        Ok(payload) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/octet-stream")], payload)
                .into_response()
        }
        Err(e) => {
            if let QueryError::Transport(ref msg) = e {
                tracing::warn!(client_id = %client_id, err = %msg, "live fetch failed");
            }
            e.to_http_response().into_response()
        }
    }
}

/// `GET /clients`: list live connections.
pub async fn list_clients(State(s): State<Arc<BridgeState>>) -> impl IntoResponse {
    let now = Instant::now();
    let handles = s.registry.snapshot().await;
    let mut list = Vec::with_capacity(handles.len());
    for handle in handles {
        let cached_age_ms = s.cache.age(&handle.client_id).await.map(|d| d.as_millis() as u64);
        list.push(ClientInfo {
            client_id: handle.client_id.clone(),
            conn_id: handle.conn_id.to_string(),
            state: handle.state().as_str().to_owned(),
            connected_ms: now.saturating_duration_since(handle.connected_at).as_millis() as u64,
            idle_ms: handle.idle_for(now).as_millis() as u64,
            cached_age_ms,
        });
    }
    list.sort_by(|a, b| a.client_id.cmp(&b.client_id));
    Json(list)
}

/// `DELETE /clients/{client_id}`: force a client's connection closed.
pub async fn disconnect_client(
    State(s): State<Arc<BridgeState>>,
    Path(client_id): Path<String>,
) -> Response {
    match s.registry.remove(&client_id).await {
        Some(handle) => {
            handle.close();
            tracing::info!(
                client_id = %client_id,
                conn_id = %handle.conn_id,
                "client disconnected by operator"
            );
            Json(DisconnectResponse { client_id, disconnected: true }).into_response()
        }
        None => QueryError::NotConnected.to_http_response().into_response(),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
