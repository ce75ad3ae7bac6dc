//! Routes inbound command-class payloads to the registered adapter

use super::{CommandAdapter, CommandError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-node dispatch table keyed by command class id.
pub struct CommandDispatcher {
    adapters: HashMap<u8, Arc<dyn CommandAdapter>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter. A second adapter for the same class replaces
    /// the first.
    pub fn register(&mut self, adapter: Arc<dyn CommandAdapter>) {
        self.adapters.insert(adapter.class_id(), adapter);
    }

    /// Route one inbound class payload (`payload[0]` is the class id).
    /// Returns whether some adapter handled it.
    pub async fn dispatch(&self, payload: &[u8], instance: u8) -> Result<bool, CommandError> {
        let Some((&class_id, data)) = payload.split_first() else {
            debug!("dropping empty payload");
            return Ok(false);
        };

        let Some(adapter) = self.adapters.get(&class_id) else {
            debug!(class = class_id, "no adapter for command class");
            return Ok(false);
        };

        if instance != 1 && !adapter.supports_multi_instance() {
            warn!(
                class = adapter.class_name(),
                instance, "multi-instance addressing rejected"
            );
            return Err(CommandError::MultiInstance(instance));
        }

        adapter.handle_msg(data, instance).await
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
