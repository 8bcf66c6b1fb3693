//! Configuration for the bridge connection
//!
//! [`BridgeConfig`] controls the hub name, the protocol version sent during
//! the handshake and the timeouts applied to connecting, invoking and long
//! polling.

use std::time::Duration;

use crate::error::ConnectionError;

/// Configuration for a [`BridgeConnection`](crate::BridgeConnection)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Hub that pushes events and accepts invocations
    /// Default: "Outbound"
    pub hub_name: String,

    /// Protocol version sent during negotiation
    /// Default: "1.5"
    pub client_protocol: String,

    /// Upper bound for the whole connect handshake
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// How long an invocation waits for its completion
    /// Default: 30 seconds
    pub invoke_timeout: Duration,

    /// How long one long-polling request may stay open
    /// Default: 120 seconds
    pub poll_timeout: Duration,

    /// Notify the bridge with an abort request when the connection is closed
    /// Default: true
    pub abort_on_close: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hub_name: "Outbound".to_string(),
            client_protocol: "1.5".to_string(),
            connect_timeout: Duration::from_secs(30),
            invoke_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(120),
            abort_on_close: true,
        }
    }
}

impl BridgeConfig {
    /// Create a BridgeConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return the first issue found
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.hub_name.trim().is_empty() {
            return Err(ConnectionError::Configuration(
                "Hub name must not be empty".to_string(),
            ));
        }

        if self.client_protocol.trim().is_empty() {
            return Err(ConnectionError::Configuration(
                "Client protocol must not be empty".to_string(),
            ));
        }

        if self.connect_timeout == Duration::ZERO {
            return Err(ConnectionError::Configuration(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        if self.invoke_timeout == Duration::ZERO {
            return Err(ConnectionError::Configuration(
                "Invoke timeout must be greater than 0".to_string(),
            ));
        }

        if self.poll_timeout == Duration::ZERO {
            return Err(ConnectionError::Configuration(
                "Poll timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_hub_name(mut self, hub_name: impl Into<String>) -> Self {
        self.hub_name = hub_name.into();
        self
    }

    pub fn with_client_protocol(mut self, client_protocol: impl Into<String>) -> Self {
        self.client_protocol = client_protocol.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_abort_on_close(mut self, enabled: bool) -> Self {
        self.abort_on_close = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.hub_name, "Outbound");
        assert_eq!(config.client_protocol, "1.5");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.invoke_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_timeout, Duration::from_secs(120));
        assert!(config.abort_on_close);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let empty_hub = BridgeConfig::new().with_hub_name("  ");
        assert!(matches!(
            empty_hub.validate(),
            Err(ConnectionError::Configuration(_))
        ));

        let zero_invoke = BridgeConfig::new().with_invoke_timeout(Duration::ZERO);
        assert!(zero_invoke.validate().is_err());

        let zero_connect = BridgeConfig::new().with_connect_timeout(Duration::ZERO);
        assert!(zero_connect.validate().is_err());

        let zero_poll = BridgeConfig::new().with_poll_timeout(Duration::ZERO);
        assert!(zero_poll.validate().is_err());
    }

    #[test]
    fn test_builder_pattern() {
        let config = BridgeConfig::new()
            .with_hub_name("Inbound")
            .with_invoke_timeout(Duration::from_millis(500))
            .with_abort_on_close(false);

        assert_eq!(config.hub_name, "Inbound");
        assert_eq!(config.invoke_timeout, Duration::from_millis(500));
        assert!(!config.abort_on_close);
        assert_eq!(config.client_protocol, "1.5");
    }
}
