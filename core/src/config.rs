// Hub client configuration
//
// Defaults can be overridden through LINEWATCH_* environment variables.

use crate::hub::{HubOptions, ReconnectPolicy, WebSocketConnector};
use crate::{LinewatchError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path of the machine hub below the base URL
pub const DEFAULT_HUB_PATH: &str = "/hubs/machine";

/// Connection settings for the machine hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Backend base URL, e.g. `https://mes.example.com`
    pub base_url: String,
    pub hub_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Connect straight to the socket without negotiating
    pub skip_negotiation: bool,
    pub request_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub server_timeout_ms: u64,
    pub reconnect_delays_ms: Vec<u64>,
    pub auto_reconnect: bool,
    /// Re-issue machine subscriptions after an automatic reconnect
    pub resubscribe_on_reconnect: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            hub_path: DEFAULT_HUB_PATH.to_string(),
            access_token: None,
            skip_negotiation: false,
            request_timeout_ms: 30_000,
            handshake_timeout_ms: 15_000,
            keep_alive_interval_ms: 15_000,
            server_timeout_ms: 30_000,
            reconnect_delays_ms: vec![0, 2_000, 10_000, 30_000],
            auto_reconnect: true,
            resubscribe_on_reconnect: true,
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            base_url: env_string("LINEWATCH_BASE_URL").unwrap_or(default.base_url),
            hub_path: env_string("LINEWATCH_HUB_PATH").unwrap_or(default.hub_path),
            access_token: env_string("LINEWATCH_ACCESS_TOKEN"),
            skip_negotiation: env_parse("LINEWATCH_SKIP_NEGOTIATION")
                .unwrap_or(default.skip_negotiation),
            request_timeout_ms: env_parse("LINEWATCH_REQUEST_TIMEOUT_MS")
                .unwrap_or(default.request_timeout_ms),
            handshake_timeout_ms: env_parse("LINEWATCH_HANDSHAKE_TIMEOUT_MS")
                .unwrap_or(default.handshake_timeout_ms),
            keep_alive_interval_ms: env_parse("LINEWATCH_KEEP_ALIVE_MS")
                .unwrap_or(default.keep_alive_interval_ms),
            server_timeout_ms: env_parse("LINEWATCH_SERVER_TIMEOUT_MS")
                .unwrap_or(default.server_timeout_ms),
            reconnect_delays_ms: env_string("LINEWATCH_RECONNECT_DELAYS_MS")
                .and_then(|v| parse_delays(&v))
                .unwrap_or(default.reconnect_delays_ms),
            auto_reconnect: env_parse("LINEWATCH_AUTO_RECONNECT").unwrap_or(default.auto_reconnect),
            resubscribe_on_reconnect: env_parse("LINEWATCH_RESUBSCRIBE")
                .unwrap_or(default.resubscribe_on_reconnect),
        }
    }

    /// Full `http(s)` URL of the hub endpoint
    pub fn hub_url(&self) -> Result<Url> {
        let raw = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.hub_path.trim_start_matches('/')
        );
        let url = Url::parse(&raw)
            .map_err(|e| LinewatchError::ConfigError(format!("Invalid hub URL {}: {}", raw, e)))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(LinewatchError::ConfigError(format!(
                "Hub URL must use http or https, got {}",
                other
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.hub_url()?;

        if self.request_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(LinewatchError::ConfigError(
                "Request and handshake timeouts must be positive".to_string(),
            ));
        }
        if self.keep_alive_interval_ms == 0 {
            return Err(LinewatchError::ConfigError(
                "Keep-alive interval must be positive".to_string(),
            ));
        }
        if self.server_timeout_ms <= self.keep_alive_interval_ms {
            return Err(LinewatchError::ConfigError(format!(
                "Server timeout ({}ms) must exceed keep-alive interval ({}ms)",
                self.server_timeout_ms, self.keep_alive_interval_ms
            )));
        }
        Ok(())
    }

    pub fn options(&self) -> HubOptions {
        let reconnect = if self.auto_reconnect {
            ReconnectPolicy::new(
                self.reconnect_delays_ms
                    .iter()
                    .copied()
                    .map(Duration::from_millis)
                    .collect(),
            )
        } else {
            ReconnectPolicy::disabled()
        };

        HubOptions {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            keep_alive_interval: Duration::from_millis(self.keep_alive_interval_ms),
            server_timeout: Duration::from_millis(self.server_timeout_ms),
            reconnect,
        }
    }

    /// WebSocket connector for the configured endpoint
    pub fn connector(&self) -> Result<WebSocketConnector> {
        Ok(WebSocketConnector::new(self.hub_url()?)
            .with_access_token(self.access_token.clone())
            .with_skip_negotiation(self.skip_negotiation))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Parse a comma-separated list of millisecond delays
fn parse_delays(raw: &str) -> Option<Vec<u64>> {
    raw.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.hub_url().unwrap().as_str(),
            "http://localhost:5000/hubs/machine"
        );
    }

    #[test]
    fn test_hub_url_joins_slashes() {
        let config = HubConfig {
            base_url: "https://mes.example.com/api/".to_string(),
            hub_path: "/hubs/machine".to_string(),
            ..HubConfig::default()
        };
        assert_eq!(
            config.hub_url().unwrap().as_str(),
            "https://mes.example.com/api/hubs/machine"
        );
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let config = HubConfig {
            base_url: "not a url".to_string(),
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());

        let config = HubConfig {
            base_url: "ws://mes.example.com".to_string(),
            ..HubConfig::default()
        };
        assert!(config.hub_url().is_err());
    }

    #[test]
    fn test_server_timeout_must_exceed_keep_alive() {
        let config = HubConfig {
            keep_alive_interval_ms: 30_000,
            server_timeout_ms: 30_000,
            ..HubConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Server timeout"));
    }

    #[test]
    fn test_options_respect_auto_reconnect() {
        let config = HubConfig::default();
        let options = config.options();
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert_eq!(options.reconnect.delays().len(), 4);

        let config = HubConfig {
            auto_reconnect: false,
            ..HubConfig::default()
        };
        assert!(!config.options().reconnect.is_enabled());
    }

    #[test]
    fn test_parse_delays() {
        assert_eq!(parse_delays("0, 1000,5000"), Some(vec![0, 1000, 5000]));
        assert_eq!(parse_delays("0,soon"), None);
        assert_eq!(parse_delays(""), Some(vec![]));
    }
}
