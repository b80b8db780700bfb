// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP request handlers module
//!
//! Health and metrics endpoints, credential revocation, tenant broadcasts and
//! the WebSocket event stream.

use axum::{
    Extension, Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use gateway_runtime::{Fingerprint, Subscription, metrics::EXPOSITION_CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use shared_types::{Role, TenantId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    auth::{Authenticated, Claims},
    error::{ServerError, ServerResult},
    extractors::JsonExtractor,
    state::{HealthCheck, ServerState},
};

/// Longest accepted event type
pub const MAX_EVENT_TYPE_LENGTH: usize = 128;

/// Health check endpoint handler
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthCheck> {
    Json(state.health_check())
}

/// Prometheus text exposition of the request metrics
pub async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        state.runtime().metrics.snapshot(),
    )
}

/// Revoke the bearer token used for this request
///
/// The revocation lasts until the token's own expiry.
pub async fn revoke_handler(
    State(state): State<ServerState>,
    Extension(auth): Extension<Authenticated>,
) -> ServerResult<StatusCode> {
    let expires_at = auth
        .claims
        .expires_at()
        .ok_or_else(|| ServerError::ValidationError("token expiry is out of range".to_string()))?;

    let fingerprint = Fingerprint::of_token(&auth.token);
    info!(
        %fingerprint,
        subject = %auth.claims.sub,
        tenant = %auth.claims.tenant_id,
        "token revoked by its holder"
    );
    state.runtime().revocation.revoke(fingerprint, expires_at);

    Ok(StatusCode::NO_CONTENT)
}

/// Event to publish to a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    /// Event type forwarded to subscribers
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary JSON payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl BroadcastRequest {
    /// Validates the event type
    pub fn validate(&self) -> Result<(), &'static str> {
        let event_type = self.event_type.trim();
        if event_type.is_empty() {
            return Err("event type cannot be empty");
        }
        if event_type.len() > MAX_EVENT_TYPE_LENGTH {
            return Err("event type is too long");
        }
        Ok(())
    }
}

/// Acknowledgement returned for an accepted broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastAccepted {
    /// Tenant the event was queued for
    pub tenant_id: TenantId,
    /// Event type
    #[serde(rename = "type")]
    pub event_type: String,
}

/// Publish an event to every client connected for a tenant
///
/// Requires at least the operator role within the same tenant. The event is
/// queued without waiting for delivery; a full hub queue is reported as 503.
pub async fn broadcast_handler(
    State(state): State<ServerState>,
    Path(tenant_id): Path<TenantId>,
    Extension(auth): Extension<Authenticated>,
    JsonExtractor(request): JsonExtractor<BroadcastRequest>,
) -> ServerResult<(StatusCode, Json<BroadcastAccepted>)> {
    authorize(&auth.claims, &tenant_id, Role::Operator)?;
    request
        .validate()
        .map_err(|msg| ServerError::ValidationError(msg.to_string()))?;

    let event_type = request.event_type.trim();
    state
        .runtime()
        .hub
        .broadcast_to_tenant(&tenant_id, event_type, request.payload)?;

    debug!(tenant = %tenant_id, event_type, subject = %auth.claims.sub, "broadcast queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(BroadcastAccepted {
            tenant_id,
            event_type: event_type.to_string(),
        }),
    ))
}

/// Stream a tenant's events over a WebSocket
///
/// Access is checked before the upgrade request itself. Each hub message
/// becomes one text frame. The socket is closed when the client is evicted,
/// the peer disconnects or the server shuts down.
pub async fn events_handler(
    State(state): State<ServerState>,
    Path(tenant_id): Path<TenantId>,
    Extension(auth): Extension<Authenticated>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ServerResult<Response> {
    authorize(&auth.claims, &tenant_id, Role::Viewer)?;
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let subscription = state.runtime().hub.register(tenant_id)?;
    let shutdown = state.cancellation_token.clone();

    Ok(upgrade.on_upgrade(move |socket| forward_events(socket, subscription, shutdown)))
}

async fn forward_events(
    mut socket: WebSocket,
    mut subscription: Subscription,
    shutdown: CancellationToken,
) {
    info!(client = %subscription.id(), tenant = %subscription.tenant(), "event stream opened");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            message = subscription.recv() => {
                let Some(message) = message else {
                    // Evicted or hub stopped
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if socket.send(Message::Text(message.as_ref().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!(client = %subscription.id(), tenant = %subscription.tenant(), "event stream closed");
}

/// Check tenant membership and minimum role
fn authorize(claims: &Claims, tenant_id: &TenantId, required: Role) -> ServerResult<()> {
    if claims.tenant_id != *tenant_id {
        return Err(ServerError::Forbidden {
            message: format!("token is not valid for tenant {tenant_id}"),
        });
    }
    if !claims.role.allows(required) {
        return Err(ServerError::Forbidden {
            message: format!("role {} cannot act as {required}", claims.role),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(tenant: &str, role: Role) -> Claims {
        Claims {
            sub: "caller".to_string(),
            tenant_id: TenantId::new(tenant).unwrap(),
            role,
            exp: 0,
        }
    }

    #[test]
    fn authorize_requires_matching_tenant() {
        let acme = TenantId::new("acme").unwrap();
        assert!(authorize(&claims("acme", Role::Admin), &acme, Role::Operator).is_ok());
        assert!(matches!(
            authorize(&claims("globex", Role::Admin), &acme, Role::Operator),
            Err(ServerError::Forbidden { .. })
        ));
    }

    #[test]
    fn authorize_requires_role_level() {
        let acme = TenantId::new("acme").unwrap();
        assert!(authorize(&claims("acme", Role::Operator), &acme, Role::Operator).is_ok());
        assert!(authorize(&claims("acme", Role::Viewer), &acme, Role::Viewer).is_ok());
        assert!(authorize(&claims("acme", Role::Viewer), &acme, Role::Operator).is_err());
        assert!(authorize(&claims("acme", Role::Unknown), &acme, Role::Viewer).is_err());
    }

    #[test]
    fn broadcast_request_validation() {
        let request: BroadcastRequest =
            serde_json::from_str(r#"{"type": "order.created", "payload": {"id": 1}}"#).unwrap();
        assert!(request.validate().is_ok());

        let request: BroadcastRequest = serde_json::from_str(r#"{"type": "  "}"#).unwrap();
        assert!(request.payload.is_null());
        assert!(request.validate().is_err());

        let request = BroadcastRequest {
            event_type: "x".repeat(MAX_EVENT_TYPE_LENGTH + 1),
            payload: serde_json::Value::Null,
        };
        assert!(request.validate().is_err());
    }
}
