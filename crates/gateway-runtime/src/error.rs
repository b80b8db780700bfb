// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for the gateway runtime primitives
//!
//! Construction problems are reported as [`RuntimeError`] and are fatal to the
//! caller. Runtime outcomes that callers are expected to handle (a cancelled
//! throttle wait, a dropped broadcast) have their own narrow error types so
//! they can be matched exhaustively.

use thiserror::Error;

/// Result type alias for runtime construction
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors raised while constructing or starting runtime components
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A configuration value was out of range
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// A component that spawns background work was created outside a Tokio runtime
    #[error("No Tokio runtime available to start {component}")]
    NoRuntime {
        /// Component that failed to start
        component: &'static str,
    },
}

impl RuntimeError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Outcome of an outbound throttle wait that did not yield a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ThrottleError {
    /// The caller's cancellation token fired while waiting
    #[error("throttle wait was cancelled")]
    Cancelled,

    /// The caller's deadline elapsed while waiting
    #[error("throttle wait timed out")]
    TimedOut,

    /// The throttle was closed
    #[error("throttle is closed")]
    Closed,
}

/// Errors returned by broadcast hub operations
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub's broadcast queue was full and the event was dropped
    #[error("broadcast queue is full, event for tenant {tenant} dropped")]
    QueueFull {
        /// Tenant the dropped event was addressed to
        tenant: String,
    },

    /// The hub has been shut down
    #[error("broadcast hub is shut down")]
    Closed,

    /// The event could not be serialised
    #[error("failed to serialize hub message: {source}")]
    Serialization {
        /// Underlying serde error
        #[from]
        source: serde_json::Error,
    },
}
