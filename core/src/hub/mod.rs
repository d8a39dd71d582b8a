/// Real-time hub client
///
/// Client for a JSON hub endpoint: a persistent WebSocket channel over which
/// the client invokes server methods and the server invokes client handlers.
///
/// Architecture:
/// - `protocol`: wire messages, record framing, handshake
/// - `transport`: `HubConnector` trait and the WebSocket implementation
/// - `connection`: lifecycle, invocation correlation, keep-alive, reconnect
/// - `options`: timeouts and reconnect policy
pub mod connection;
pub mod error;
pub mod options;
pub mod protocol;
pub mod transport;

pub use connection::{ConnectionState, HubConnection, InvocationHandler};
pub use error::HubError;
pub use options::{HubOptions, ReconnectPolicy};
pub use protocol::HubMessage;
pub use transport::{HubConnector, TransportLink, WebSocketConnector};
