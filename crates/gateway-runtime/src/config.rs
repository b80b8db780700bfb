// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the runtime primitives
//!
//! Every component validates its configuration at construction time; an
//! invalid value is a [`RuntimeError::Configuration`] and the component is
//! never created.

use std::time::Duration;

use crate::error::{RuntimeError, RuntimeResult};

/// Default histogram boundaries in seconds (5ms to 10s)
pub const DEFAULT_LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const DEFAULT_ADMISSION_MAX_REQUESTS: u32 = 100;
const DEFAULT_ADMISSION_WINDOW_SECONDS: u64 = 60;
const DEFAULT_ADMISSION_SWEEP_SECONDS: u64 = 300;
const DEFAULT_THROTTLE_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_REVOCATION_SWEEP_SECONDS: u64 = 60;
const DEFAULT_MAILBOX_CAPACITY: usize = 64;
const DEFAULT_BROADCAST_QUEUE_CAPACITY: usize = 1024;

/// Inbound fixed-window admission settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Requests allowed per client within one window
    pub max_requests: u32,
    /// Length of a window
    pub window: Duration,
    /// How often elapsed windows are swept from memory
    pub sweep_interval: Duration,
}

impl AdmissionConfig {
    /// Validate the admission settings
    ///
    /// # Errors
    ///
    /// Returns an error for a zero request limit, window or sweep interval.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.max_requests == 0 {
            return Err(RuntimeError::configuration(
                "admission max_requests must be greater than 0",
            ));
        }
        if self.window.is_zero() {
            return Err(RuntimeError::configuration(
                "admission window must be greater than 0",
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(RuntimeError::configuration(
                "admission sweep_interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_ADMISSION_MAX_REQUESTS,
            window: Duration::from_secs(DEFAULT_ADMISSION_WINDOW_SECONDS),
            sweep_interval: Duration::from_secs(DEFAULT_ADMISSION_SWEEP_SECONDS),
        }
    }
}

/// Outbound token bucket settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Sustained call rate allowed against the external API
    pub requests_per_minute: u32,
}

impl ThrottleConfig {
    /// Validate the throttle settings
    ///
    /// # Errors
    ///
    /// Returns an error if `requests_per_minute` is zero.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.requests_per_minute == 0 {
            return Err(RuntimeError::configuration(
                "throttle requests_per_minute must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_THROTTLE_REQUESTS_PER_MINUTE,
        }
    }
}

/// Revocation cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevocationConfig {
    /// How often expired revocations are swept
    pub sweep_interval: Duration,
}

impl RevocationConfig {
    /// Validate the revocation settings
    ///
    /// # Errors
    ///
    /// Returns an error for a zero sweep interval.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.sweep_interval.is_zero() {
            return Err(RuntimeError::configuration(
                "revocation sweep_interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_REVOCATION_SWEEP_SECONDS),
        }
    }
}

/// Metrics aggregator settings
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Histogram bucket boundaries in seconds, strictly ascending
    pub buckets: Vec<f64>,
}

impl MetricsConfig {
    /// Validate the histogram boundaries
    ///
    /// # Errors
    ///
    /// Returns an error if the boundaries are empty, non-finite, not positive
    /// or not strictly ascending.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.buckets.is_empty() {
            return Err(RuntimeError::configuration(
                "metrics buckets cannot be empty",
            ));
        }
        if let Some(bad) = self
            .buckets
            .iter()
            .find(|b| !b.is_finite() || **b <= 0.0)
        {
            return Err(RuntimeError::configuration(format!(
                "metrics bucket boundary {bad} must be a positive finite number"
            )));
        }
        if self.buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(RuntimeError::configuration(
                "metrics buckets must be strictly ascending",
            ));
        }
        Ok(())
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_LATENCY_BUCKETS.to_vec(),
        }
    }
}

/// Tenant broadcast hub settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Messages buffered per connected client before it is evicted
    pub mailbox_capacity: usize,
    /// Broadcasts buffered by the hub before new ones are dropped
    pub broadcast_queue_capacity: usize,
}

impl HubConfig {
    /// Validate the hub settings
    ///
    /// # Errors
    ///
    /// Returns an error if either capacity is zero.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.mailbox_capacity == 0 {
            return Err(RuntimeError::configuration(
                "hub mailbox_capacity must be greater than 0",
            ));
        }
        if self.broadcast_queue_capacity == 0 {
            return Err(RuntimeError::configuration(
                "hub broadcast_queue_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            broadcast_queue_capacity: DEFAULT_BROADCAST_QUEUE_CAPACITY,
        }
    }
}

/// Settings for every component owned by a [`GatewayRuntime`](crate::GatewayRuntime)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayRuntimeConfig {
    /// Inbound admission limiter
    pub admission: AdmissionConfig,
    /// Outbound throttle
    pub throttle: ThrottleConfig,
    /// Revocation cache
    pub revocation: RevocationConfig,
    /// Metrics aggregator
    pub metrics: MetricsConfig,
    /// Broadcast hub
    pub hub: HubConfig,
}

impl GatewayRuntimeConfig {
    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns the first section error encountered.
    pub fn validate(&self) -> RuntimeResult<()> {
        self.admission.validate()?;
        self.throttle.validate()?;
        self.revocation.validate()?;
        self.metrics.validate()?;
        self.hub.validate()
    }
}
