//! Transport trait abstraction for pluggable bridge backends

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use wakehub_shared::NodeId;

/// How urgently the bridge should treat a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    /// Application command traffic
    Command,
    /// Driver-initiated state and value queries
    Query,
    /// Stale-value re-polls
    Poll,
}

/// A fully formed command bound for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub node: NodeId,
    /// Complete command-class payload, starting at the class id byte.
    pub payload: Bytes,
    pub delivery: DeliveryClass,
}

/// Forwards one command toward a node.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand one command to the bridge. `Ok` means accepted for send, not
    /// delivered; the handler does not retry at this layer.
    async fn forward(&self, item: OutboundCommand) -> Result<()>;
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Records every forwarded command.
    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<OutboundCommand>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<OutboundCommand> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn forward(&self, item: OutboundCommand) -> Result<()> {
            self.sent.lock().unwrap().push(item);
            Ok(())
        }
    }

    /// Holds every forward until the test releases a permit.
    pub struct GatedTransport {
        sent: Mutex<Vec<OutboundCommand>>,
        gate: Semaphore,
    }

    impl GatedTransport {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                gate: Semaphore::new(0),
            }
        }

        pub fn release(&self, permits: usize) {
            self.gate.add_permits(permits);
        }

        pub fn sent(&self) -> Vec<OutboundCommand> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn forward(&self, item: OutboundCommand) -> Result<()> {
            self.gate.acquire().await?.forget();
            self.sent.lock().unwrap().push(item);
            Ok(())
        }
    }

    /// Fails the first `fail_first` forwards, then succeeds.
    pub struct FlakyTransport {
        sent: Mutex<Vec<OutboundCommand>>,
        attempts: AtomicUsize,
        fail_first: usize,
    }

    impl FlakyTransport {
        pub fn new(fail_first: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
                fail_first,
            }
        }

        pub fn sent(&self) -> Vec<OutboundCommand> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn forward(&self, item: OutboundCommand) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                bail!("bridge rejected command for node {}", item.node);
            }
            self.sent.lock().unwrap().push(item);
            Ok(())
        }
    }
}
