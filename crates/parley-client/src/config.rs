//! Client configuration.

use std::time::Duration;

use parley_core::{DEFAULT_LOOKBACK, Endpoint, EngineConfig};

/// Default REST base URL of the room directory.
pub const DEFAULT_API_BASE: &str = "http://localhost:8080";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Websocket endpoint every identity connects to
    pub endpoint: Endpoint,
    /// Base URL of the room directory
    pub api_base: String,
    /// Reconciler lookback window
    pub lookback: Duration,
    /// Re-read member lists of every known room on this interval. `None`
    /// relies on Notify frames alone.
    pub member_poll_interval: Option<Duration>,
    /// Capacity of the command, transport and per-socket channels
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            lookback: DEFAULT_LOOKBACK,
            member_poll_interval: None,
            channel_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Engine part of the configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig { endpoint: self.endpoint.clone(), lookback: self.lookback }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_backend() {
        let config = ClientConfig::default();

        assert_eq!(config.endpoint.as_str(), "ws://localhost:8081/ws");
        assert_eq!(config.api_base, "http://localhost:8080");
        assert_eq!(config.lookback, Duration::from_secs(5));
        assert!(config.member_poll_interval.is_none());
    }

    #[test]
    fn engine_config_carries_endpoint_and_lookback() {
        let config = ClientConfig { lookback: Duration::from_millis(250), ..Default::default() };
        let engine = config.engine();

        assert_eq!(engine.endpoint, config.endpoint);
        assert_eq!(engine.lookback, Duration::from_millis(250));
    }
}
