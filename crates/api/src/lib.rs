// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Tenant Gateway Server Implementation
//!
//! This crate provides the HTTP server of the multi-tenant gateway, built with
//! Axum on top of the `gateway-runtime` primitives.
//!
//! # Module Structure
//!
//! - [`config`]: Server configuration and environment management with hierarchical loading
//! - [`error`]: Error types and HTTP response handling with proper status codes
//! - [`auth`]: Bearer token claims and verification
//! - [`extractors`]: JSON body extraction with descriptive rejections
//! - [`state`]: Shared application state with cancellation token support
//! - [`server`]: Main server implementation, lifecycle, and coordinated shutdown
//! - [`routes`]: Route configuration and HTTP request handlers
//! - [`middleware`]: Metrics, admission control and authentication layers
//!
//! # Key Features
//!
//! - **Admission Control**: Fixed-window limits per client, answered with 429 and `Retry-After`
//! - **Revocation**: Revoked bearer tokens are rejected until they expire
//! - **Real-time Push**: Tenant-scoped events streamed to WebSocket subscribers
//! - **Observability**: Prometheus text metrics per route template
//! - **Graceful Shutdown**: Coordinated termination using `CancellationToken`

pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{Claims, JwtVerifier, TokenVerifier};
pub use config::{ClientKeyStrategy, Environment, ServerConfig};
pub use error::{AuthError, ServerError, ServerResult};
pub use server::{Server, ShutdownConfig};
pub use shared_types::{HubMessage, Role, TenantId};
pub use state::{HealthCheck, HealthStatus, ServerState};
