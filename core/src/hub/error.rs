use thiserror::Error;

/// Errors raised by the hub connection and its transports
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection is not in the Connected state")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,

    #[error("Server error: {0}")]
    Server(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HubError {
    /// Convert to error code string
    pub fn code(&self) -> &'static str {
        match self {
            HubError::Transport(_) => "TRANSPORT_ERROR",
            HubError::Handshake(_) => "HANDSHAKE_ERROR",
            HubError::Protocol(_) => "PROTOCOL_ERROR",
            HubError::NotConnected => "NOT_CONNECTED",
            HubError::ConnectionClosed => "CONNECTION_CLOSED",
            HubError::Timeout => "TIMEOUT",
            HubError::Server(_) => "SERVER_ERROR",
            HubError::Json(_) => "JSON_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_error_codes() {
        assert_eq!(HubError::Timeout.code(), "TIMEOUT");
        assert_eq!(HubError::NotConnected.code(), "NOT_CONNECTED");
        assert_eq!(
            HubError::Server("boom".to_string()).code(),
            "SERVER_ERROR"
        );
        assert_eq!(
            HubError::Server("boom".to_string()).to_string(),
            "Server error: boom"
        );
    }
}
