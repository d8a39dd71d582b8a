/// Subscription registry
///
/// Per-machine callback slots owned by a `MachineHubClient`. Metrics updates
/// are routed to the single callback registered for the machine they name;
/// runtime-block updates are broadcast to every registered runtime-block
/// callback.
use super::models::{OeeUpdate, RuntimeBlock};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Receives OEE snapshots for one machine
pub type MetricsCallback = Arc<dyn Fn(OeeUpdate) + Send + Sync>;

/// Receives runtime-block updates
pub type RuntimeBlockCallback = Arc<dyn Fn(RuntimeBlock) + Send + Sync>;

#[derive(Default)]
pub struct SubscriptionRegistry {
    /// machine_id -> metrics callback
    metrics: DashMap<String, MetricsCallback>,
    /// machine_id -> runtime-block callback
    runtime_blocks: DashMap<String, RuntimeBlockCallback>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register callbacks for a machine, replacing any previous pair
    pub fn register(
        &self,
        machine_id: &str,
        on_metrics: MetricsCallback,
        on_runtime_block: Option<RuntimeBlockCallback>,
    ) {
        self.metrics.insert(machine_id.to_string(), on_metrics);

        match on_runtime_block {
            Some(callback) => {
                self.runtime_blocks.insert(machine_id.to_string(), callback);
            }
            None => {
                self.runtime_blocks.remove(machine_id);
            }
        }

        debug!(target: "machine_hub", machine = %machine_id, "Registered machine callbacks");
    }

    /// Drop both callbacks for a machine; true if anything was registered
    pub fn remove(&self, machine_id: &str) -> bool {
        let metrics = self.metrics.remove(machine_id).is_some();
        let blocks = self.runtime_blocks.remove(machine_id).is_some();
        metrics || blocks
    }

    pub fn contains(&self, machine_id: &str) -> bool {
        self.metrics.contains_key(machine_id)
    }

    /// Registered machine ids, sorted
    pub fn machine_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.metrics.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Deliver an update to the callback registered for `machine_id`.
    /// Returns false when nobody is subscribed.
    pub fn dispatch_metrics(&self, machine_id: &str, update: OeeUpdate) -> bool {
        // Clone out of the map so callbacks may re-enter the registry
        let callback = self.metrics.get(machine_id).map(|e| Arc::clone(e.value()));

        match callback {
            Some(callback) => {
                callback(update);
                true
            }
            None => {
                debug!(target: "machine_hub", machine = %machine_id, "No subscriber for machine update");
                false
            }
        }
    }

    /// Deliver a runtime block to every registered runtime-block callback,
    /// whichever machine the block belongs to. Returns the number invoked.
    pub fn broadcast_runtime_block(&self, block: &RuntimeBlock) -> usize {
        let callbacks: Vec<RuntimeBlockCallback> = self
            .runtime_blocks
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        for callback in &callbacks {
            callback(block.clone());
        }
        callbacks.len()
    }
}
