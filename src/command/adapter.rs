//! Capability interface implemented by each protocol adapter

use super::CommandError;
use crate::values::ValueIndex;
use async_trait::async_trait;

/// Which slice of a node's state a refresh targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateQuery {
    /// Rarely changing configuration: negotiated intervals, capabilities
    Static,
    /// Values that go stale while the node sleeps
    Dynamic,
}

/// One protocol adapter per command class per node. The dispatcher holds a
/// collection of these keyed by class id, not a class hierarchy.
#[async_trait]
pub trait CommandAdapter: Send + Sync {
    /// Command class id this adapter decodes.
    fn class_id(&self) -> u8;

    fn class_name(&self) -> &'static str;

    /// Highest command class version the adapter implements.
    fn max_version(&self) -> u8 {
        1
    }

    fn supports_multi_instance(&self) -> bool {
        false
    }

    /// Decode one inbound payload, starting at the command id byte.
    /// Returns false when the payload is not recognized.
    async fn handle_msg(&self, data: &[u8], instance: u8) -> Result<bool, CommandError>;

    /// Queue a write of one externally settable value.
    async fn set_value(&self, index: ValueIndex, value: u32) -> Result<(), CommandError>;

    /// Queue a refresh of the class state. Returns whether anything was queued.
    async fn request_state(&self, query: StateQuery) -> Result<bool, CommandError>;

    /// Queue a refresh of one value. Returns whether anything was queued.
    async fn request_value(&self, index: ValueIndex) -> Result<bool, CommandError>;

    /// Register the class's externally observable values. Invoked once when
    /// the node is provisioned.
    async fn create_vars(&self);
}
