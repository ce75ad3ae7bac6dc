//! Externally observable configuration values
//!
//! Each protocol adapter registers the values it exposes once, at node
//! provisioning time, and updates them when the device reports.

use std::collections::HashMap;
use tokio::sync::RwLock;
use wakehub_shared::NodeId;

/// Index of a value within a node's command class.
pub type ValueIndex = u16;

/// The wake-up interval setting exposed by the wake-up adapter.
pub const WAKE_INTERVAL_INDEX: ValueIndex = 0;

/// Identifies one configuration value on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueKey {
    pub node: NodeId,
    pub index: ValueIndex,
}

/// A single externally settable configuration entry.
#[derive(Debug, Clone)]
pub struct ConfigValue {
    pub label: &'static str,
    pub units: &'static str,
    pub value: u32,
    pub writable: bool,
}

/// Registry of configuration values across all managed nodes.
pub struct ValueStore {
    values: RwLock<HashMap<ValueKey, ConfigValue>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Register a value. Registering an existing key keeps the current entry.
    pub async fn register(&self, key: ValueKey, value: ConfigValue) {
        self.values.write().await.entry(key).or_insert(value);
    }

    pub async fn get(&self, key: ValueKey) -> Option<ConfigValue> {
        self.values.read().await.get(&key).cloned()
    }

    /// Update a registered value from a device report. Returns false if the
    /// key was never registered.
    pub async fn update(&self, key: ValueKey, value: u32) -> bool {
        match self.values.write().await.get_mut(&key) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }

    /// Drop every value belonging to a removed node.
    pub async fn remove_node(&self, node: NodeId) {
        self.values.write().await.retain(|key, _| key.node != node);
    }
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new()
    }
}
