// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the bridge API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeError {
    BadRequest,
    NotConnected,
    Busy,
    TransportError,
    Timeout,
}

impl BridgeError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotConnected => 404,
            Self::Busy => 409,
            Self::TransportError => 500,
            Self::Timeout => 504,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::NotConnected => "NOT_CONNECTED",
            Self::Busy => "BUSY",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a pull request against an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// No live connection is registered for the id.
    NotConnected,
    /// Another directive is still outstanding on the connection.
    Busy,
    /// Writing the directive or reading the reply failed.
    Transport(String),
    /// The request deadline passed before a reply arrived.
    Timeout,
}

impl QueryError {
    pub fn code(&self) -> BridgeError {
        match self {
            Self::NotConnected => BridgeError::NotConnected,
            Self::Busy => BridgeError::Busy,
            Self::Transport(_) => BridgeError::TransportError,
            Self::Timeout => BridgeError::Timeout,
        }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        self.code().to_http_response(self.to_string())
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("client not connected"),
            Self::Busy => f.write_str("a query is already in flight for this client"),
            Self::Transport(msg) => f.write_str(msg),
            Self::Timeout => f.write_str("timed out waiting for client reply"),
        }
    }
}

impl std::error::Error for QueryError {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
