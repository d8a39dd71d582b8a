use std::time::Duration;

/// Delays between automatic reconnect attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
}

impl ReconnectPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Never reconnect
    pub fn disabled() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn is_enabled(&self) -> bool {
        !self.delays.is_empty()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for ReconnectPolicy {
    /// 0s, 2s, 10s, 30s, then give up
    fn default() -> Self {
        Self::new(
            [0, 2_000, 10_000, 30_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
        )
    }
}

/// Timing knobs for a hub connection
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Ping after this much outbound silence
    pub keep_alive_interval: Duration,
    /// Link is lost after this much inbound silence
    pub server_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
