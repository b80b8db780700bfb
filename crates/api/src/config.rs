// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server configuration module
//!
//! This module provides configuration structures and logic for the gateway
//! server, supporting different environments and validation of configuration
//! parameters. Runtime component settings are kept in plain seconds and counts
//! here and converted into a [`GatewayRuntimeConfig`] when the server starts.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::{Result, anyhow, ensure};
use config::{Config, ConfigError, Environment as ConfigEnv, File};
use gateway_runtime::{
    AdmissionConfig, GatewayRuntimeConfig, HubConfig, MetricsConfig, RevocationConfig,
    ThrottleConfig, config::DEFAULT_LATENCY_BUCKETS,
};
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::error::{ServerError, ServerResult};

/// A validated server port that ensures the value is appropriate for the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerPort {
    port: u16,
    environment: Environment,
}

impl ServerPort {
    /// Create a new `ServerPort`, ensuring it's valid for the given environment
    ///
    /// # Errors
    ///
    /// Returns an error if the port is 0 in non-testing environments
    pub fn new(port: u16, environment: Environment) -> Result<Self> {
        if port == 0 && environment != Environment::Testing {
            return Err(anyhow!("port cannot be 0 in non-testing environments"));
        }
        Ok(Self { port, environment })
    }

    /// Create a safe default port for development
    pub const fn default_development() -> Self {
        Self {
            port: 3000,
            environment: Environment::Development,
        }
    }

    /// Create a safe testing port (port 0)
    pub const fn testing() -> Self {
        Self {
            port: 0,
            environment: Environment::Testing,
        }
    }

    /// Get the port value
    pub fn value(&self) -> u16 {
        self.port
    }
}

impl<'de> Deserialize<'de> for ServerPort {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let port = u16::deserialize(deserializer)?;
        // Re-validated in `ServerConfig::load` once the environment is known
        Ok(Self {
            port,
            environment: Environment::Development,
        })
    }
}

/// A validated timeout duration in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutSeconds(Duration);

impl TimeoutSeconds {
    /// Create a new `TimeoutSeconds`, ensuring the value is within valid bounds
    ///
    /// # Errors
    ///
    /// Returns an error if timeout is 0 or greater than 300 seconds
    pub fn new(seconds: u64) -> Result<Self> {
        ensure!(seconds != 0, "timeout must be greater than 0");
        ensure!(seconds <= 300, "timeout cannot exceed 300");
        Ok(Self(Duration::from_secs(seconds)))
    }

    /// Create a safe default timeout (30 seconds)
    pub const fn default_value() -> Self {
        Self(Duration::from_secs(30))
    }

    /// Create a safe testing timeout (5 seconds)
    pub const fn testing() -> Self {
        Self(Duration::from_secs(5))
    }

    /// Get the timeout value
    pub fn value(&self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for TimeoutSeconds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Self::new(seconds).map_err(|e| de::Error::custom(e.to_string()))
    }
}

impl Default for TimeoutSeconds {
    fn default() -> Self {
        Self::default_value()
    }
}

/// Shared secret used to verify HS256 bearer tokens
///
/// Never printed or serialised.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct JwtSecret(String);

impl JwtSecret {
    /// Create a new secret
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is blank
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        ensure!(!secret.trim().is_empty(), "jwt secret cannot be empty");
        Ok(Self(secret))
    }

    /// Secret bytes for key construction
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Whether no secret has been configured
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JwtSecret([REDACTED])")
    }
}

impl<'de> Deserialize<'de> for JwtSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secret = String::deserialize(deserializer)?;
        Self::new(secret).map_err(|e| de::Error::custom(e.to_string()))
    }
}

/// Environment types for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production environment
    Production,
    /// Development environment
    Development,
    /// Testing environment
    Testing,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Development => write!(f, "development"),
            Environment::Testing => write!(f, "testing"),
        }
    }
}

/// How the admission limiter identifies a client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKeyStrategy {
    /// The TCP peer address of the connection
    #[default]
    PeerAddress,
    /// The left-most `X-Forwarded-For` entry, falling back to the peer address
    ForwardedFor,
}

/// Inbound admission settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Whether admission control is applied to API routes
    pub enabled: bool,
    /// Requests allowed per client within one window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_seconds: u64,
    /// Seconds between sweeps of elapsed windows
    pub sweep_interval_seconds: u64,
    /// Client identification strategy
    pub client_key: ClientKeyStrategy,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        let defaults = AdmissionConfig::default();
        Self {
            enabled: true,
            max_requests: defaults.max_requests,
            window_seconds: defaults.window.as_secs(),
            sweep_interval_seconds: defaults.sweep_interval.as_secs(),
            client_key: ClientKeyStrategy::default(),
        }
    }
}

/// Bearer token settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 secret shared with the token issuer
    pub jwt_secret: JwtSecret,
}

/// Outbound call pacing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundSettings {
    /// Calls allowed per minute to downstream integrations
    pub requests_per_minute: u32,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: ThrottleConfig::default().requests_per_minute,
        }
    }
}

/// Broadcast hub sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Messages buffered per connected client before eviction
    pub mailbox_capacity: usize,
    /// Broadcasts buffered before new ones are dropped
    pub broadcast_queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        let defaults = HubConfig::default();
        Self {
            mailbox_capacity: defaults.mailbox_capacity,
            broadcast_queue_capacity: defaults.broadcast_queue_capacity,
        }
    }
}

/// Metrics settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Latency histogram upper bounds in seconds
    pub buckets: Vec<f64>,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_LATENCY_BUCKETS.to_vec(),
        }
    }
}

/// Revocation cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationSettings {
    /// Seconds between sweeps of expired revocations
    pub sweep_interval_seconds: u64,
}

impl Default for RevocationSettings {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: RevocationConfig::default().sweep_interval.as_secs(),
        }
    }
}

/// Server configuration for different environments
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    pub host: IpAddr,
    /// Server port (validated for environment compatibility)
    pub port: ServerPort,
    /// Request timeout in seconds (validated range: 1-300)
    pub timeout_seconds: TimeoutSeconds,
    /// Environment type
    pub environment: Environment,
    /// Inbound admission control
    #[serde(default)]
    pub admission: AdmissionSettings,
    /// Bearer token verification
    #[serde(default)]
    pub auth: AuthSettings,
    /// Outbound call pacing
    #[serde(default)]
    pub outbound: OutboundSettings,
    /// Tenant broadcast hub
    #[serde(default)]
    pub hub: HubSettings,
    /// Request metrics
    #[serde(default)]
    pub metrics: MetricsSettings,
    /// Revoked token cache
    #[serde(default)]
    pub revocation: RevocationSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: ServerPort::default_development(),
            timeout_seconds: TimeoutSeconds::default(),
            environment: Environment::Development,
            admission: AdmissionSettings::default(),
            auth: AuthSettings::default(),
            outbound: OutboundSettings::default(),
            hub: HubSettings::default(),
            metrics: MetricsSettings::default(),
            revocation: RevocationSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables and optional configuration files
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if configuration is invalid or cannot be loaded.
    pub fn from_env() -> ServerResult<Self> {
        let config = Self::load().map_err(|e| ServerError::Config {
            message: format!("failed to load configuration: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration using the config crate with hierarchical sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. Configuration file (config.json)
    /// 3. Environment-specific files (config.{env}.json)
    /// 4. Environment variables with `SERVER_` prefix, nested with `__`
    ///    (for example `SERVER_ADMISSION__MAX_REQUESTS=50`)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let env_var = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut config_builder = Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 3000)?
            .set_default("timeout_seconds", 30)?
            .set_default("environment", "development")?
            .add_source(File::with_name("config.json").required(false))
            .add_source(
                File::with_name(&format!("config.{}.json", env_var.to_lowercase())).required(false),
            )
            .add_source(
                ConfigEnv::with_prefix("SERVER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if std::env::var("ENVIRONMENT").is_ok() {
            config_builder = config_builder.set_override("environment", env_var.to_lowercase())?;
        }

        let config = config_builder.build()?;
        let mut server_config: Self = config.try_deserialize()?;

        // Fix the ServerPort to have the correct environment context
        server_config.port = ServerPort::new(server_config.port.value(), server_config.environment)
            .map_err(|e| ConfigError::Message(format!("invalid port configuration: {e}")))?;

        Ok(server_config)
    }

    /// Check settings that cannot be enforced while deserialising
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` when no JWT secret is configured or a
    /// runtime section is out of range.
    pub fn validate(&self) -> ServerResult<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ServerError::Config {
                message: "auth.jwt_secret must be set".to_string(),
            });
        }
        self.runtime_config()
            .validate()
            .map_err(|e| ServerError::Config {
                message: e.to_string(),
            })
    }

    /// Create configuration optimized for testing
    pub fn for_testing() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: ServerPort::testing(), // let OS choose available port
            timeout_seconds: TimeoutSeconds::testing(),
            environment: Environment::Testing,
            auth: AuthSettings {
                jwt_secret: JwtSecret(TESTING_JWT_SECRET.to_string()),
            },
            ..Self::default()
        }
    }

    /// Settings for the runtime components
    pub fn runtime_config(&self) -> GatewayRuntimeConfig {
        GatewayRuntimeConfig {
            admission: AdmissionConfig {
                max_requests: self.admission.max_requests,
                window: Duration::from_secs(self.admission.window_seconds),
                sweep_interval: Duration::from_secs(self.admission.sweep_interval_seconds),
            },
            throttle: ThrottleConfig {
                requests_per_minute: self.outbound.requests_per_minute,
            },
            revocation: RevocationConfig {
                sweep_interval: Duration::from_secs(self.revocation.sweep_interval_seconds),
            },
            metrics: MetricsConfig {
                buckets: self.metrics.buckets.clone(),
            },
            hub: HubConfig {
                mailbox_capacity: self.hub.mailbox_capacity,
                broadcast_queue_capacity: self.hub.broadcast_queue_capacity,
            },
        }
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port.value())
    }
}

/// Secret used by [`ServerConfig::for_testing`]
pub const TESTING_JWT_SECRET: &str = "testing-secret-do-not-use-in-production";
