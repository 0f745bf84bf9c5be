//! Server configuration

use serde::{Deserialize, Serialize};
use sockrpc_transport::tcp::DEFAULT_MAX_FRAME_LENGTH;

use crate::error::{ServerError, ServerResult};

/// Default cap on handlers running at once
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 128;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,
    /// Bind port; 0 picks an ephemeral port
    pub port: u16,
    /// Handlers allowed to run at the same time across all connections
    pub max_concurrent_requests: usize,
    /// Largest accepted frame in bytes
    pub max_frame_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ServerConfig {
    /// Configuration listening on `bind_address:port`
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the handler concurrency cap
    pub const fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Check the configuration for values the server cannot run with
    pub fn validate(&self) -> ServerResult<()> {
        if self.bind_address.is_empty() {
            return Err(ServerError::configuration("bind_address must not be empty"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ServerError::configuration(
                "max_concurrent_requests must be greater than 0",
            ));
        }
        if self.max_frame_length == 0 {
            return Err(ServerError::configuration(
                "max_frame_length must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.max_concurrent_requests, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: ServerConfig = serde_json::from_str(r#"{"port": 7400}"#).unwrap();
        assert_eq!(config.port, 7400);
        assert_eq!(config.max_concurrent_requests, DEFAULT_MAX_CONCURRENT_REQUESTS);
    }

    #[test]
    fn test_invalid() {
        let config = ServerConfig::new("0.0.0.0", 7400).with_max_concurrent_requests(0);
        assert!(matches!(
            config.validate(),
            Err(ServerError::Configuration { .. })
        ));
        assert!(ServerConfig::new("", 1).validate().is_err());
    }
}
