use std::fs;
use std::path::Path;

use linewatch_core::HubConfig;

/// Configuration for the machine monitor demo
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub hub: HubConfig,
    /// Machines to subscribe to on startup
    pub machines: Vec<String>,
    /// Print runtime-block updates as they arrive
    pub show_runtime_blocks: bool,
    /// Fetch the current aggregation and subscriber count after subscribing
    pub query_on_start: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::from_env(),
            machines: std::env::var("LINEWATCH_MACHINES")
                .map(|v| split_machines(&v))
                .unwrap_or_default(),
            show_runtime_blocks: std::env::var("LINEWATCH_SHOW_BLOCKS")
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(true),
            query_on_start: true,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file (path via LINEWATCH_CONFIG or ./linewatch.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("LINEWATCH_CONFIG").unwrap_or_else(|_| "linewatch.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target = "monitor", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::overlay_str(&s, default.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target = "monitor", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target = "monitor", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    fn overlay_str(raw: &str, base: Self) -> Result<Self, toml::de::Error> {
        let t = toml::from_str::<MonitorToml>(raw)?;
        Ok(t.overlay(base))
    }
}

fn split_machines(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct MonitorToml {
    pub machines: Option<Vec<String>>,
    pub show_runtime_blocks: Option<bool>,
    pub query_on_start: Option<bool>,
    pub hub: Option<HubToml>,
}

impl MonitorToml {
    fn overlay(self, mut base: MonitorConfig) -> MonitorConfig {
        if let Some(m) = self.machines {
            base.machines = m;
        }
        if let Some(v) = self.show_runtime_blocks {
            base.show_runtime_blocks = v;
        }
        if let Some(v) = self.query_on_start {
            base.query_on_start = v;
        }
        if let Some(h) = self.hub {
            h.apply(&mut base.hub);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct HubToml {
    pub base_url: Option<String>,
    pub hub_path: Option<String>,
    pub access_token: Option<String>,
    pub skip_negotiation: Option<bool>,
    pub request_timeout_ms: Option<u64>,
    pub keep_alive_interval_ms: Option<u64>,
    pub server_timeout_ms: Option<u64>,
    pub reconnect_delays_ms: Option<Vec<u64>>,
    pub auto_reconnect: Option<bool>,
    pub resubscribe_on_reconnect: Option<bool>,
}

impl HubToml {
    fn apply(self, h: &mut HubConfig) {
        if let Some(x) = self.base_url {
            h.base_url = x;
        }
        if let Some(x) = self.hub_path {
            h.hub_path = x;
        }
        if let Some(x) = self.access_token {
            h.access_token = Some(x);
        }
        if let Some(x) = self.skip_negotiation {
            h.skip_negotiation = x;
        }
        if let Some(x) = self.request_timeout_ms {
            h.request_timeout_ms = x;
        }
        if let Some(x) = self.keep_alive_interval_ms {
            h.keep_alive_interval_ms = x;
        }
        if let Some(x) = self.server_timeout_ms {
            h.server_timeout_ms = x;
        }
        if let Some(x) = self.reconnect_delays_ms {
            h.reconnect_delays_ms = x;
        }
        if let Some(x) = self.auto_reconnect {
            h.auto_reconnect = x;
        }
        if let Some(x) = self.resubscribe_on_reconnect {
            h.resubscribe_on_reconnect = x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> MonitorConfig {
        MonitorConfig {
            hub: HubConfig::default(),
            machines: vec!["M1".to_string()],
            show_runtime_blocks: true,
            query_on_start: true,
        }
    }

    #[test]
    fn test_overlay_replaces_only_present_fields() {
        let raw = r#"
            machines = ["press-01", "press-02"]
            query_on_start = false

            [hub]
            base_url = "https://mes.example.com"
            reconnect_delays_ms = [0, 1000]
        "#;

        let cfg = MonitorConfig::overlay_str(raw, base()).unwrap();
        assert_eq!(cfg.machines, vec!["press-01", "press-02"]);
        assert!(!cfg.query_on_start);
        assert!(cfg.show_runtime_blocks);
        assert_eq!(cfg.hub.base_url, "https://mes.example.com");
        assert_eq!(cfg.hub.reconnect_delays_ms, vec![0, 1000]);
        assert_eq!(cfg.hub.hub_path, "/hubs/machine");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(MonitorConfig::overlay_str("machines = 3", base()).is_err());
    }

    #[test]
    fn test_split_machines() {
        assert_eq!(split_machines(" M1, ,M2 "), vec!["M1", "M2"]);
        assert!(split_machines("").is_empty());
    }
}
