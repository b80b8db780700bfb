// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server state management module
//!
//! This module provides shared application state for the gateway server:
//! configuration, the runtime components, the token verifier and the
//! cancellation token used for coordinated shutdown.

use std::{fmt, sync::Arc};

use gateway_runtime::GatewayRuntime;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::TokenVerifier,
    config::{Environment, ServerConfig},
    error::ServerResult,
};

/// Shared application state with cancellation token support
#[derive(Clone)]
pub struct ServerState {
    config: Arc<ServerConfig>,
    runtime: GatewayRuntime,
    verifier: Arc<dyn TokenVerifier>,
    /// Cancellation token for coordinated shutdown
    pub cancellation_token: CancellationToken,
}

impl fmt::Debug for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("runtime", &self.runtime)
            .field("cancellation_token", &self.cancellation_token)
            .finish_non_exhaustive()
    }
}

impl ServerState {
    /// Create new server state around already started runtime components
    pub fn new(
        config: ServerConfig,
        runtime: GatewayRuntime,
        verifier: Arc<dyn TokenVerifier>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            runtime,
            verifier,
            cancellation_token,
        }
    }

    /// Start the runtime components described by `config`
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Runtime` if a runtime section is invalid.
    pub fn start(config: ServerConfig, verifier: Arc<dyn TokenVerifier>) -> ServerResult<Self> {
        let runtime = GatewayRuntime::start(config.runtime_config())?;
        Ok(Self::new(
            config,
            runtime,
            verifier,
            CancellationToken::new(),
        ))
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runtime components
    pub fn runtime(&self) -> &GatewayRuntime {
        &self.runtime
    }

    /// Bearer token verifier
    pub fn verifier(&self) -> &dyn TokenVerifier {
        self.verifier.as_ref()
    }

    /// Current health of the gateway
    pub fn health_check(&self) -> HealthCheck {
        let status = if self.cancellation_token.is_cancelled() {
            HealthStatus::Down {
                reason: Box::from("shutting down"),
            }
        } else if self.runtime.throttle.is_closed() {
            HealthStatus::Degraded {
                reason: Box::from("outbound throttle closed"),
            }
        } else {
            HealthStatus::Up
        };

        HealthCheck {
            status,
            version: Box::from(env!("CARGO_PKG_VERSION")),
            environment: self.config.environment,
            timestamp: chrono::Utc::now().to_rfc3339(),
            connected_clients: self.runtime.hub.connected_clients(),
            tracked_clients: self.runtime.admission.len(),
            revoked_tokens: self.runtime.revocation.len(),
        }
    }
}

/// Health status of the service
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    /// Service is fully operational and responding normally
    Up,

    /// Service is not operational
    Down {
        /// Human-readable explanation of why the service is down
        reason: Box<str>,
    },

    /// Service is operational but a component is unavailable
    Degraded {
        /// Human-readable explanation of the degradation condition
        reason: Box<str>,
    },
}

/// Health check report
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Service status
    pub status: HealthStatus,
    /// Service version
    pub version: Box<str>,
    /// Environment
    pub environment: Environment,
    /// Timestamp
    pub timestamp: String,
    /// Clients connected to the broadcast hub
    pub connected_clients: usize,
    /// Clients with an open admission window
    pub tracked_clients: usize,
    /// Revocations currently held
    pub revoked_tokens: usize,
}
