// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Gateway Runtime Primitives
//!
//! Concurrent building blocks shared by every request a multi-tenant gateway
//! handles. Each component is safe to use from many tasks at once and owns
//! its own background maintenance.
//!
//! # Module Structure
//!
//! - [`admission`]: Per-client fixed-window admission limiter with background sweeping
//! - [`throttle`]: Token bucket pacing outbound calls, cancellable and closeable
//! - [`revocation`]: Expiring set of revoked credential fingerprints
//! - [`metrics`]: Request counters, latency histograms and Prometheus text exposition
//! - [`hub`]: Tenant-scoped broadcast of events to connected clients
//! - [`periodic`]: Cancellable fixed-period background jobs with panic containment
//! - [`config`]: Validated settings for each component
//! - [`error`]: Error types for construction and runtime outcomes
//!
//! [`GatewayRuntime`] starts all of them from one [`GatewayRuntimeConfig`] and
//! stops them together.

pub mod admission;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod periodic;
pub mod revocation;
pub mod throttle;

use std::sync::Arc;

pub use admission::{AdmissionDecision, AdmissionLimiter};
pub use config::{
    AdmissionConfig, GatewayRuntimeConfig, HubConfig, MetricsConfig, RevocationConfig,
    ThrottleConfig,
};
pub use error::{HubError, RuntimeError, RuntimeResult, ThrottleError};
pub use hub::{BroadcastHub, ClientId, Subscription};
pub use metrics::{ActiveRequestGuard, MetricsAggregator};
pub use periodic::PeriodicTask;
pub use revocation::{Fingerprint, RevocationCache};
pub use throttle::OutboundThrottle;

use tracing::info;

/// Every runtime component, started and stopped as a unit
#[derive(Debug, Clone)]
pub struct GatewayRuntime {
    /// Inbound admission limiter
    pub admission: AdmissionLimiter,
    /// Outbound call throttle
    pub throttle: OutboundThrottle,
    /// Revoked credential cache
    pub revocation: RevocationCache,
    /// Request metrics
    pub metrics: Arc<MetricsAggregator>,
    /// Tenant broadcast hub
    pub hub: BroadcastHub,
}

impl GatewayRuntime {
    /// Validate `config` and start every component on the current runtime
    ///
    /// # Errors
    ///
    /// Returns an error if any section is invalid or no Tokio runtime is
    /// available.
    pub fn start(config: GatewayRuntimeConfig) -> RuntimeResult<Self> {
        config.validate()?;

        let runtime = Self {
            admission: AdmissionLimiter::new(config.admission)?,
            throttle: OutboundThrottle::new(config.throttle)?,
            revocation: RevocationCache::new(config.revocation)?,
            metrics: Arc::new(MetricsAggregator::new(config.metrics)?),
            hub: BroadcastHub::new(config.hub)?,
        };

        info!(
            admission_max_requests = runtime.admission.max_requests(),
            admission_window_secs = runtime.admission.window().as_secs(),
            throttle_capacity = runtime.throttle.capacity(),
            "gateway runtime started"
        );

        Ok(runtime)
    }

    /// Stop background work, close the throttle and the hub; idempotent
    pub fn shutdown(&self) {
        self.admission.shutdown();
        self.revocation.shutdown();
        self.throttle.close();
        self.hub.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_and_stops_every_component() {
        let runtime = GatewayRuntime::start(GatewayRuntimeConfig::default()).unwrap();

        assert!(runtime.admission.allow("198.51.100.7").is_allowed());
        assert!(runtime.throttle.try_acquire());

        runtime.shutdown();
        runtime.shutdown();

        assert!(runtime.throttle.is_closed());
        assert!(!runtime.throttle.try_acquire());
    }

    #[tokio::test]
    async fn rejects_invalid_section() {
        let mut config = GatewayRuntimeConfig::default();
        config.hub.mailbox_capacity = 0;
        assert!(matches!(
            GatewayRuntime::start(config),
            Err(RuntimeError::Configuration { .. })
        ));
    }
}
