/// Machine telemetry over the machine hub
///
/// - `client`: subscribe/unsubscribe and point-in-time queries
/// - `registry`: per-machine callback slots and dispatch
/// - `models`: OEE and runtime-block payloads
pub mod client;
pub mod models;
pub mod registry;

pub use client::MachineHubClient;
pub use models::{OeeUpdate, RunState, RuntimeBlock};
pub use registry::{MetricsCallback, RuntimeBlockCallback, SubscriptionRegistry};

/// Server methods invoked by the client
pub mod methods {
    pub const SUBSCRIBE: &str = "SubscribeToMachine";
    pub const UNSUBSCRIBE: &str = "UnsubscribeFromMachine";
    pub const GET_AGGREGATION: &str = "GetMachineAggregation";
    pub const GET_RUNTIME_BLOCKS: &str = "GetMachineRuntimeBlocks";
    pub const GET_SUBSCRIBER_COUNT: &str = "GetSubscriberCount";
}

/// Client methods invoked by the server
pub mod events {
    pub const MACHINE_UPDATE: &str = "MachineUpdate";
    pub const RUNTIME_BLOCK_UPDATE: &str = "MachineRuntimeUpdateLastBlock";
}
