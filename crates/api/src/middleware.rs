// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Middleware module for HTTP request processing
//!
//! This module provides the cross-cutting layers of the gateway: request
//! metrics, per-client admission control and bearer token authentication.

use std::net::SocketAddr;

use axum::{
    body::HttpBody,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, header::CONTENT_LENGTH},
    middleware::Next,
    response::Response,
};
use gateway_runtime::{AdmissionDecision, Fingerprint, metrics::route_label};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    auth::{Authenticated, bearer_token},
    config::ClientKeyStrategy,
    error::{AuthError, ServerError},
    state::ServerState,
};

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Identify the client for admission purposes
///
/// With [`ClientKeyStrategy::ForwardedFor`] the left-most `X-Forwarded-For`
/// entry is used when present and non-empty.
pub fn client_key(strategy: ClientKeyStrategy, headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = match strategy {
        ClientKeyStrategy::PeerAddress => None,
        ClientKeyStrategy::ForwardedFor => headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty()),
    };

    forwarded.map_or_else(|| peer.ip().to_string(), ToString::to_string)
}

/// Admission control middleware
///
/// Denied requests never reach the handler and are answered with 429 and a
/// `Retry-After` header.
pub async fn admission_middleware(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<ServerState>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let key = client_key(state.config().admission.client_key, req.headers(), peer);

    match state.runtime().admission.allow(&key) {
        AdmissionDecision::Allowed { remaining } => {
            debug!(client = %key, remaining, "request admitted");
            Ok(next.run(req).await)
        }
        AdmissionDecision::Denied { retry_after } => {
            warn!(
                client = %key,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "admission limit exceeded"
            );
            Err(ServerError::TooManyRequests { retry_after })
        }
    }
}

/// Bearer token authentication middleware
///
/// Verifies the token, rejects revoked ones and stores [`Authenticated`] in
/// the request extensions for handlers.
pub async fn auth_middleware(
    State(state): State<ServerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let token = bearer_token(req.headers())?.to_owned();

    let claims = state.verifier().verify(&token).inspect_err(|e| {
        debug!(error = %e, "bearer token rejected");
    })?;

    let fingerprint = Fingerprint::of_token(&token);
    if state.runtime().revocation.is_revoked(&fingerprint) {
        warn!(
            %fingerprint,
            subject = %claims.sub,
            tenant = %claims.tenant_id,
            "revoked token presented"
        );
        return Err(AuthError::Revoked.into());
    }

    req.extensions_mut().insert(Authenticated { claims, token });
    Ok(next.run(req).await)
}

/// Request metrics middleware
///
/// Records method, matched route template, status, latency and response
/// size for every request, and keeps the in-flight gauge balanced on every
/// exit path through the guard.
pub async fn metrics_middleware(
    State(state): State<ServerState>,
    matched_path: Option<MatchedPath>,
    req: Request,
    next: Next,
) -> Response {
    let metrics = state.runtime().metrics.clone();
    let _in_flight = metrics.track_request();

    let method = req.method().clone();
    let route = route_label(matched_path.as_ref().map(MatchedPath::as_str)).to_owned();
    let started = Instant::now();

    let response = next.run(req).await;

    metrics.observe(
        method.as_str(),
        &route,
        response.status().as_u16(),
        started.elapsed(),
        response_bytes(&response),
    );
    response
}

/// Size of the response body when it is known up front
fn response_bytes(response: &Response) -> u64 {
    response.body().size_hint().exact().unwrap_or_else(|| {
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Extension, Router,
        body::{Body, to_bytes},
        extract::connect_info::MockConnectInfo,
        http::{HeaderValue, StatusCode, header::AUTHORIZATION, header::RETRY_AFTER},
        middleware::from_fn_with_state,
        routing::get,
    };
    use chrono::{TimeDelta, Utc};
    use shared_types::{Role, TenantId};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::{Claims, MockTokenVerifier},
        config::ServerConfig,
    };

    fn peer() -> SocketAddr {
        "203.0.113.9:52000".parse().unwrap()
    }

    fn claims() -> Claims {
        Claims {
            sub: "svc-orders".to_string(),
            tenant_id: TenantId::new("acme").unwrap(),
            role: Role::Operator,
            exp: (Utc::now() + TimeDelta::hours(1)).timestamp(),
        }
    }

    fn state_with(config: ServerConfig, verifier: MockTokenVerifier) -> ServerState {
        ServerState::start(config, Arc::new(verifier)).unwrap()
    }

    fn accepting_verifier() -> MockTokenVerifier {
        let mut verifier = MockTokenVerifier::new();
        verifier.expect_verify().returning(|_| Ok(claims()));
        verifier
    }

    async fn whoami(Extension(auth): Extension<Authenticated>) -> String {
        auth.claims.sub
    }

    fn get_with_token(uri: &str, token: &'static str) -> Request {
        let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static(token));
        req
    }

    #[test]
    fn client_key_strategies() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            client_key(ClientKeyStrategy::ForwardedFor, &headers, peer()),
            "203.0.113.9"
        );

        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static(" 198.51.100.4 , 10.0.0.1"),
        );
        assert_eq!(
            client_key(ClientKeyStrategy::ForwardedFor, &headers, peer()),
            "198.51.100.4"
        );
        assert_eq!(
            client_key(ClientKeyStrategy::PeerAddress, &headers, peer()),
            "203.0.113.9"
        );

        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static(" ,10.0.0.1"));
        assert_eq!(
            client_key(ClientKeyStrategy::ForwardedFor, &headers, peer()),
            "203.0.113.9"
        );
    }

    #[tokio::test]
    async fn admission_denies_over_limit_with_retry_after() {
        let mut config = ServerConfig::for_testing();
        config.admission.max_requests = 2;
        let state = state_with(config, MockTokenVerifier::new());

        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(from_fn_with_state(state.clone(), admission_middleware))
            .layer(MockConnectInfo(peer()));

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"error":"too many requests"}"#);
        state.runtime().shutdown();
    }

    #[tokio::test]
    async fn auth_accepts_verified_token() {
        let state = state_with(ServerConfig::for_testing(), accepting_verifier());
        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn_with_state(state.clone(), auth_middleware));

        let response = app
            .oneshot(get_with_token("/whoami", "Bearer good-token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"svc-orders");
    }

    #[tokio::test]
    async fn auth_rejects_missing_and_invalid_tokens() {
        let mut verifier = MockTokenVerifier::new();
        verifier
            .expect_verify()
            .withf(|token| token == "forged")
            .times(1)
            .returning(|_| {
                Err(AuthError::InvalidToken {
                    message: "InvalidSignature".to_string(),
                })
            });
        let state = state_with(ServerConfig::for_testing(), verifier);
        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn_with_state(state, auth_middleware));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(get_with_token("/whoami", "Bearer forged"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_rejects_revoked_token() {
        let state = state_with(ServerConfig::for_testing(), accepting_verifier());
        state.runtime().revocation.revoke(
            Fingerprint::of_token("stolen-token"),
            Utc::now() + TimeDelta::hours(1),
        );

        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn_with_state(state.clone(), auth_middleware));

        let response = app
            .clone()
            .oneshot(get_with_token("/whoami", "Bearer stolen-token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(get_with_token("/whoami", "Bearer other-token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_record_route_template_and_unknown() {
        let state = state_with(ServerConfig::for_testing(), MockTokenVerifier::new());
        let app = Router::new()
            .route("/orders/{id}", get(|| async { "order" }))
            .layer(from_fn_with_state(state.clone(), metrics_middleware));

        for uri in ["/orders/1", "/orders/2", "/missing"] {
            app.clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
        }

        let exposition = state.runtime().metrics.snapshot();
        assert!(exposition.contains(
            r#"http_requests_total{method="GET",route="/orders/{id}",status="200"} 2"#
        ));
        assert!(exposition.contains(
            r#"http_requests_total{method="GET",route="unknown",status="404"} 1"#
        ));
        assert!(exposition.contains("http_response_bytes_total 10\n"));
        assert!(exposition.contains("http_requests_in_flight 0\n"));
    }

    #[tokio::test]
    async fn metrics_count_requests_rejected_by_inner_layers() {
        let state = state_with(ServerConfig::for_testing(), MockTokenVerifier::new());
        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn_with_state(state.clone(), auth_middleware))
            .layer(from_fn_with_state(state.clone(), metrics_middleware));

        let response = app
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(state.runtime().metrics.snapshot().contains(
            r#"http_requests_total{method="GET",route="/whoami",status="401"} 1"#
        ));
    }
}
