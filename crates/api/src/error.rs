// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error handling module
//!
//! This module provides error types for server operations, including proper
//! HTTP response mapping and error propagation.

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use gateway_runtime::{HubError, RuntimeError};
use thiserror::Error;

/// Error types for server operations
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration validation errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Network binding errors
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Socket address that failed to bind
        address: SocketAddr,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server startup errors
    #[error("Server startup failed: {source}")]
    Startup {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server shutdown errors
    #[error("Server shutdown failed: {source}")]
    Shutdown {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Runtime components could not be started
    #[error("Runtime error: {source}")]
    Runtime {
        /// Underlying runtime error
        #[from]
        source: RuntimeError,
    },

    /// Task join errors for async operations
    #[error("Task join error: {source}")]
    TaskJoin {
        /// Underlying tokio join error
        #[source]
        source: tokio::task::JoinError,
    },

    /// The caller could not be authenticated
    #[error("Unauthorized: {0}")]
    Auth(#[from] AuthError),

    /// The caller is authenticated but lacks access
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Error message
        message: String,
    },

    /// The admission limiter denied the request
    #[error("too many requests")]
    TooManyRequests {
        /// Time until the client's window resets
        retry_after: Duration,
    },

    /// Broadcast could not be accepted
    #[error("Broadcast error: {0}")]
    Hub(#[from] HubError),

    /// Input validation errors
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// JSON parsing errors with detailed context
    #[error("Invalid JSON request: {message}")]
    JsonError {
        /// Detailed error message
        message: String,
    },
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Reasons a bearer credential was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization: Bearer` header was sent
    #[error("missing bearer token")]
    MissingCredentials,

    /// The token has expired
    #[error("token has expired")]
    Expired,

    /// The token has been revoked
    #[error("token has been revoked")]
    Revoked,

    /// The token failed verification
    #[error("invalid token: {message}")]
    InvalidToken {
        /// Verification failure
        message: String,
    },
}

/// Whole seconds to advertise in `Retry-After`, rounded up and at least 1
pub fn retry_after_seconds(retry_after: Duration) -> u64 {
    let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    seconds.max(1)
}

impl ServerError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Config { .. }
            | ServerError::Bind { .. }
            | ServerError::Startup { .. }
            | ServerError::Shutdown { .. }
            | ServerError::Runtime { .. }
            | ServerError::TaskJoin { .. }
            | ServerError::Hub(HubError::Serialization { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Hub(HubError::QueueFull { .. } | HubError::Closed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ServerError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServerError::ValidationError(..) | ServerError::JsonError { .. } => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let ServerError::TooManyRequests { retry_after } = self {
            let mut response = (
                status,
                Json(serde_json::json!({ "error": "too many requests" })),
            )
                .into_response();
            response.headers_mut().insert(
                RETRY_AFTER,
                HeaderValue::from(retry_after_seconds(retry_after)),
            );
            return response;
        }

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));
        (status, body).into_response()
    }
}

/// Convenient From implementations for common async error types
impl From<tokio::task::JoinError> for ServerError {
    fn from(source: tokio::task::JoinError) -> Self {
        Self::TaskJoin { source }
    }
}
