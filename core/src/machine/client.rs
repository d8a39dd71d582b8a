/// Machine hub client
///
/// Wraps one `HubConnection` to the machine hub. Every remote operation has a
/// `try_*` form that reports failures, and a best-effort form for live
/// dashboard widgets that logs the failure and falls back to an empty value
/// (`None`, empty list, zero). Callers that must tell "no data yet" from
/// "request failed" use the `try_*` forms.
use super::models::{OeeUpdate, RuntimeBlock};
use super::registry::{MetricsCallback, RuntimeBlockCallback, SubscriptionRegistry};
use super::{events, methods};
use crate::config::HubConfig;
use crate::hub::{ConnectionState, HubConnection, HubConnector, HubError};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct MachineHubClient {
    connection: Arc<HubConnection>,
    registry: Arc<SubscriptionRegistry>,
}

impl MachineHubClient {
    /// Client over a WebSocket connection described by `config`
    pub fn new(config: &HubConfig) -> Result<Self> {
        config.validate()?;
        let connector = Arc::new(config.connector()?);
        Ok(Self::with_connector(config, connector))
    }

    /// Client over a caller-supplied transport
    pub fn with_connector(config: &HubConfig, connector: Arc<dyn HubConnector>) -> Self {
        let connection = Arc::new(HubConnection::new(config.options(), connector));
        let registry = Arc::new(SubscriptionRegistry::new());

        install_handlers(&connection, &registry);
        if config.resubscribe_on_reconnect {
            install_resubscribe(&connection, &registry);
        }

        Self {
            connection,
            registry,
        }
    }

    /// Registry shared with UI layers that need to inspect subscriptions
    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Open the connection if needed; failures are logged
    pub async fn start(&self) {
        if let Err(e) = self.try_start().await {
            error!(target: "machine_hub", error = %e, "Failed to connect to machine hub");
        }
    }

    pub async fn try_start(&self) -> std::result::Result<(), HubError> {
        self.connection.start().await
    }

    /// Close the connection if open
    pub async fn stop(&self) {
        self.connection.stop().await;
    }

    /// Register callbacks for a machine and subscribe to it remotely.
    /// The local registration is kept when the remote call fails.
    ///
    /// Both callbacks replace any earlier pair for the machine: passing
    /// `None` for `on_runtime_block` drops a previously registered
    /// runtime-block callback.
    pub async fn subscribe(
        &self,
        machine_id: &str,
        on_metrics: MetricsCallback,
        on_runtime_block: Option<RuntimeBlockCallback>,
    ) {
        if let Err(e) = self
            .try_subscribe(machine_id, on_metrics, on_runtime_block)
            .await
        {
            warn!(
                target: "machine_hub",
                machine = %machine_id,
                error = %e,
                "Remote subscribe failed; local callbacks kept"
            );
        }
    }

    pub async fn try_subscribe(
        &self,
        machine_id: &str,
        on_metrics: MetricsCallback,
        on_runtime_block: Option<RuntimeBlockCallback>,
    ) -> std::result::Result<(), HubError> {
        self.registry
            .register(machine_id, on_metrics, on_runtime_block);

        self.connection
            .invoke_value(methods::SUBSCRIBE, vec![json!(machine_id)])
            .await?;

        info!(target: "machine_hub", machine = %machine_id, "Subscribed to machine");
        Ok(())
    }

    /// Drop local callbacks; tell the server only while connected
    pub async fn unsubscribe(&self, machine_id: &str) {
        if let Err(e) = self.try_unsubscribe(machine_id).await {
            warn!(target: "machine_hub", machine = %machine_id, error = %e, "Remote unsubscribe failed");
        }
    }

    pub async fn try_unsubscribe(&self, machine_id: &str) -> std::result::Result<(), HubError> {
        self.registry.remove(machine_id);

        if self.connection.state() != ConnectionState::Connected {
            debug!(target: "machine_hub", machine = %machine_id, "Not connected; skipping remote unsubscribe");
            return Ok(());
        }

        self.connection
            .invoke_value(methods::UNSUBSCRIBE, vec![json!(machine_id)])
            .await?;

        info!(target: "machine_hub", machine = %machine_id, "Unsubscribed from machine");
        Ok(())
    }

    /// Current OEE aggregation; `None` when unavailable
    pub async fn get_aggregation(&self, machine_id: &str) -> Option<OeeUpdate> {
        recover(
            "GetMachineAggregation",
            machine_id,
            self.try_get_aggregation(machine_id).await,
        )
    }

    pub async fn try_get_aggregation(
        &self,
        machine_id: &str,
    ) -> std::result::Result<Option<OeeUpdate>, HubError> {
        self.connection
            .invoke(methods::GET_AGGREGATION, vec![json!(machine_id)])
            .await
    }

    /// Runtime blocks for the current period; empty when unavailable
    pub async fn get_runtime_blocks(&self, machine_id: &str) -> Vec<RuntimeBlock> {
        recover(
            "GetMachineRuntimeBlocks",
            machine_id,
            self.try_get_runtime_blocks(machine_id).await,
        )
    }

    pub async fn try_get_runtime_blocks(
        &self,
        machine_id: &str,
    ) -> std::result::Result<Vec<RuntimeBlock>, HubError> {
        let blocks: Option<Vec<RuntimeBlock>> = self
            .connection
            .invoke(methods::GET_RUNTIME_BLOCKS, vec![json!(machine_id)])
            .await?;
        Ok(blocks.unwrap_or_default())
    }

    /// Number of clients watching a machine; zero when unavailable
    pub async fn get_subscriber_count(&self, machine_id: &str) -> u64 {
        recover(
            "GetSubscriberCount",
            machine_id,
            self.try_get_subscriber_count(machine_id).await,
        )
    }

    pub async fn try_get_subscriber_count(
        &self,
        machine_id: &str,
    ) -> std::result::Result<u64, HubError> {
        let count: Option<u64> = self
            .connection
            .invoke(methods::GET_SUBSCRIBER_COUNT, vec![json!(machine_id)])
            .await?;
        Ok(count.unwrap_or(0))
    }
}

/// Best-effort boundary: log the failure, hand back the empty value
fn recover<T: Default>(
    operation: &str,
    machine_id: &str,
    result: std::result::Result<T, HubError>,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(
                target: "machine_hub",
                operation = %operation,
                machine = %machine_id,
                code = e.code(),
                error = %e,
                "Hub query failed; returning empty result"
            );
            T::default()
        }
    }
}

fn install_handlers(connection: &HubConnection, registry: &Arc<SubscriptionRegistry>) {
    let metrics = Arc::clone(registry);
    connection.on(events::MACHINE_UPDATE, move |args| {
        on_machine_update(&metrics, args)
    });

    let blocks = Arc::clone(registry);
    connection.on(events::RUNTIME_BLOCK_UPDATE, move |args| {
        on_runtime_block_update(&blocks, args)
    });
}

/// Server group membership is per connection, so subscriptions are replayed
/// after an automatic reconnect
fn install_resubscribe(connection: &Arc<HubConnection>, registry: &Arc<SubscriptionRegistry>) {
    let connection_ref = Arc::downgrade(connection);
    let registry = Arc::clone(registry);

    connection.on_reconnected(move || {
        let Some(connection) = connection_ref.upgrade() else {
            return;
        };
        let machine_ids = registry.machine_ids();
        if machine_ids.is_empty() {
            return;
        }

        tokio::spawn(async move {
            for machine_id in machine_ids {
                match connection
                    .invoke_value(methods::SUBSCRIBE, vec![json!(machine_id)])
                    .await
                {
                    Ok(_) => {
                        debug!(target: "machine_hub", machine = %machine_id, "Resubscribed after reconnect")
                    }
                    Err(e) => {
                        warn!(target: "machine_hub", machine = %machine_id, error = %e, "Resubscribe failed")
                    }
                }
            }
        });
    });
}

/// `MachineUpdate(update)` or `MachineUpdate(machineId, update)`
fn on_machine_update(registry: &SubscriptionRegistry, args: &[Value]) {
    let (named, payload) = match args {
        [Value::String(id), payload, ..] => (Some(id.clone()), payload),
        [payload, ..] => (None, payload),
        [] => {
            warn!(target: "machine_hub", "MachineUpdate without arguments");
            return;
        }
    };

    let update: OeeUpdate = match serde_json::from_value(payload.clone()) {
        Ok(update) => update,
        Err(e) => {
            warn!(target: "machine_hub", error = %e, "Invalid MachineUpdate payload");
            return;
        }
    };

    let Some(machine_id) = named.or_else(|| update.machine_id.clone()) else {
        warn!(target: "machine_hub", "MachineUpdate does not name a machine");
        return;
    };

    registry.dispatch_metrics(&machine_id, update);
}

/// `MachineRuntimeUpdateLastBlock(block)`: the block is the last argument
fn on_runtime_block_update(registry: &SubscriptionRegistry, args: &[Value]) {
    let Some(payload) = args.last() else {
        warn!(target: "machine_hub", "Runtime block update without arguments");
        return;
    };

    match serde_json::from_value::<RuntimeBlock>(payload.clone()) {
        Ok(block) => {
            let delivered = registry.broadcast_runtime_block(&block);
            debug!(target: "machine_hub", delivered = delivered, "Broadcast runtime block");
        }
        Err(e) => {
            warn!(target: "machine_hub", error = %e, "Invalid runtime block payload");
        }
    }
}
