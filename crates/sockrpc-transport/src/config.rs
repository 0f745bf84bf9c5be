//! Channel and pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::Endpoint;
use crate::error::{ChannelError, ChannelResult, PoolError, PoolResult};
use crate::tcp::{DEFAULT_MAX_FRAME_LENGTH, TcpConfig};

/// Default lower pool bound
pub const DEFAULT_MIN_CONNECTIONS: usize = 10;
/// Default upper pool bound
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
/// Default idle eviction delay
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 2_000;
/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Bounds and timers of a connection pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections kept open even when idle
    pub min: usize,
    /// Hard cap on live connections (idle + in flight + being opened)
    pub max: usize,
    /// Idle time after which a connection may be evicted
    pub idle_timeout_ms: u64,
    /// Age after which a returned connection is destroyed instead of reused
    pub max_lifetime_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_CONNECTIONS,
            max: DEFAULT_MAX_CONNECTIONS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_lifetime_ms: None,
        }
    }
}

impl PoolConfig {
    /// Idle eviction delay as a [`Duration`]
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Maximum connection age, if any
    #[must_use]
    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }

    /// Check the pool bounds
    pub fn validate(&self) -> PoolResult<()> {
        if self.max == 0 {
            return Err(PoolError::Configuration(
                "max must be at least 1".to_string(),
            ));
        }
        if self.min > self.max {
            return Err(PoolError::Configuration(format!(
                "min ({}) must not be greater than max ({})",
                self.min, self.max
            )));
        }
        if self.idle_timeout_ms == 0 {
            return Err(PoolError::Configuration(
                "idle timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Immutable configuration of a [`Channel`](crate::Channel)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Remote peers every connection is bound to
    pub addresses: Vec<Endpoint>,
    /// Connections kept open even when idle
    pub min: usize,
    /// Hard cap on live connections
    pub max: usize,
    /// Idle time after which a connection may be evicted
    pub idle_timeout_ms: u64,
    /// Time a request may wait for its reply
    pub request_timeout_ms: u64,
    /// Time allowed to open one TCP connection
    pub connect_timeout_ms: u64,
    /// Age after which a returned connection is destroyed instead of reused
    pub max_lifetime_ms: Option<u64>,
    /// Largest accepted TCP frame
    pub max_frame_length: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            min: DEFAULT_MIN_CONNECTIONS,
            max: DEFAULT_MAX_CONNECTIONS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_lifetime_ms: None,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ChannelConfig {
    /// Start building a configuration
    #[must_use]
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::new()
    }

    /// Per-request timeout as a [`Duration`]
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Pool section of this configuration
    #[must_use]
    pub const fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min: self.min,
            max: self.max,
            idle_timeout_ms: self.idle_timeout_ms,
            max_lifetime_ms: self.max_lifetime_ms,
        }
    }

    /// TCP section of this configuration
    #[must_use]
    pub const fn tcp_config(&self) -> TcpConfig {
        TcpConfig {
            connect_timeout_ms: self.connect_timeout_ms,
            nodelay: true,
            max_frame_length: self.max_frame_length,
        }
    }

    /// Check the configuration before a channel is built from it
    pub fn validate(&self) -> ChannelResult<()> {
        self.pool_config()
            .validate()
            .map_err(|e| ChannelError::Configuration(e.to_string()))?;

        if self.addresses.is_empty() {
            return Err(ChannelError::Configuration(
                "at least one address is required".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ChannelError::Configuration(
                "request timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_frame_length == 0 {
            return Err(ChannelError::Configuration(
                "max_frame_length must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ChannelConfig`]
#[derive(Debug, Clone, Default)]
pub struct ChannelConfigBuilder {
    config: ChannelConfig,
    invalid_addresses: Vec<String>,
}

impl ChannelConfigBuilder {
    /// Create a builder with default settings and no addresses
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one peer address (`host:port`, optional `tcp://` prefix)
    #[must_use]
    pub fn address(mut self, address: impl AsRef<str>) -> Self {
        match address.as_ref().parse() {
            Ok(endpoint) => self.config.addresses.push(endpoint),
            Err(_) => self.invalid_addresses.push(address.as_ref().to_string()),
        }
        self
    }

    /// Add several peer addresses
    #[must_use]
    pub fn addresses<I, S>(self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        addresses
            .into_iter()
            .fold(self, |builder, address| builder.address(address))
    }

    /// Add an already parsed endpoint
    #[must_use]
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.addresses.push(endpoint);
        self
    }

    /// Set the lower pool bound
    #[must_use]
    pub const fn min(mut self, min: usize) -> Self {
        self.config.min = min;
        self
    }

    /// Set the upper pool bound
    #[must_use]
    pub const fn max(mut self, max: usize) -> Self {
        self.config.max = max;
        self
    }

    /// Set the idle eviction delay
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the TCP connect timeout
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Destroy connections older than `lifetime` when they are returned
    #[must_use]
    pub const fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime_ms = Some(lifetime.as_millis() as u64);
        self
    }

    /// Set the largest accepted TCP frame
    #[must_use]
    pub const fn max_frame_length(mut self, length: usize) -> Self {
        self.config.max_frame_length = length;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> ChannelResult<ChannelConfig> {
        if !self.invalid_addresses.is_empty() {
            return Err(ChannelError::Configuration(format!(
                "invalid addresses: {}",
                self.invalid_addresses.join(", ")
            )));
        }

        self.config.validate()?;
        Ok(self.config)
    }
}
