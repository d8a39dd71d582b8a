// Linewatch Core Library
// Machine telemetry hub client and dashboard formatting

pub mod config;
pub mod format;
pub mod hub;
pub mod machine;
pub mod telemetry;

// Export core types
pub use config::HubConfig;
pub use hub::{ConnectionState, HubConnection, HubConnector, HubError, WebSocketConnector};
pub use machine::{
    MachineHubClient, OeeUpdate, RunState, RuntimeBlock, SubscriptionRegistry,
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinewatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Hub error: {0}")]
    HubError(#[from] HubError),
}
pub type Result<T> = std::result::Result<T, LinewatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_errors_convert() {
        fn connect() -> Result<()> {
            let hub: std::result::Result<(), HubError> = Err(HubError::NotConnected);
            hub?;
            Ok(())
        }

        let err = connect().unwrap_err();
        assert!(matches!(err, LinewatchError::HubError(HubError::NotConnected)));
        assert_eq!(
            err.to_string(),
            "Hub error: Connection is not in the Connected state"
        );
    }
}
