// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Routes module
//!
//! This module provides route configuration and handlers for the gateway.

pub mod handlers;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use handlers::{broadcast_handler, events_handler, health_handler, metrics_handler, revoke_handler};

use crate::{
    middleware::{admission_middleware, auth_middleware, metrics_middleware},
    state::ServerState,
};

/// Create application routes
///
/// `/health` and `/metrics` are neither authenticated nor admission
/// controlled. Every route, including unmatched ones, is measured.
pub fn create_routes(state: &ServerState) -> Router<ServerState> {
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let mut api_routes = Router::new()
        .route("/auth/revoke", post(revoke_handler))
        .route("/tenants/{tenant_id}/broadcast", post(broadcast_handler))
        .route("/tenants/{tenant_id}/events", get(events_handler))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    // Admission runs before authentication so unauthenticated floods are limited too
    if state.config().admission.enabled {
        api_routes = api_routes.layer(from_fn_with_state(state.clone(), admission_middleware));
    }

    Router::new()
        .merge(public_routes)
        .nest("/v1", api_routes)
        .layer(from_fn_with_state(state.clone(), metrics_middleware))
}
