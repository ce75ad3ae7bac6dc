//! Per-node driver registry
//!
//! Tracks every managed node, owns its protocol adapters and routes
//! inbound frames to them. Each node's state is independently guarded;
//! removing one node never touches another.

use crate::command::{CommandAdapter, CommandDispatcher, CommandError, WakeUp};
use crate::config::HubConfig;
use crate::timer::TimerService;
use crate::transport::{DeliveryClass, OutboundCommand, Transport};
use crate::values::{ValueStore, WAKE_INTERVAL_INDEX};
use anyhow::{anyhow, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use wakehub_shared::codec::Frame;
use wakehub_shared::NodeId;

struct NodeEntry {
    dispatcher: Arc<CommandDispatcher>,
    wake: WakeUp,
}

/// Manages all provisioned nodes
pub struct NodeRegistry {
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
    config: HubConfig,
    transport: Arc<dyn Transport>,
    timer: Arc<dyn TimerService>,
    values: Arc<ValueStore>,
}

impl NodeRegistry {
    pub fn new(
        config: HubConfig,
        transport: Arc<dyn Transport>,
        timer: Arc<dyn TimerService>,
        values: Arc<ValueStore>,
    ) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            config,
            transport,
            timer,
            values,
        }
    }

    /// Provision a node: build its adapters, register their values and
    /// start the capability bootstrap. Provisioning an existing node is a
    /// no-op.
    pub async fn add_node(&self, node: NodeId, version: u8) {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node) {
            return;
        }

        let wake = WakeUp::new(
            node,
            version,
            self.config.hub_node,
            self.config.wake.clone(),
            self.transport.clone(),
            self.timer.clone(),
            self.values.clone(),
        );
        wake.create_vars().await;
        if let Err(e) = wake.init().await {
            warn!(node, error = %e, "capability bootstrap failed");
        }

        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(Arc::new(wake.clone()));

        nodes.insert(
            node,
            NodeEntry {
                dispatcher: Arc::new(dispatcher),
                wake,
            },
        );
        info!(node, version, "node provisioned");
    }

    /// Remove a node: its timers are cancelled and parked commands
    /// discarded along with its values.
    pub async fn remove_node(&self, node: NodeId) -> bool {
        let entry = self.nodes.write().await.remove(&node);
        match entry {
            Some(entry) => {
                entry.wake.detach().await;
                self.values.remove_node(node).await;
                info!(node, "node removed");
                true
            }
            None => false,
        }
    }

    /// Remove every node (bridge connection lost).
    pub async fn remove_all(&self) {
        for node in self.node_ids().await {
            self.remove_node(node).await;
        }
    }

    pub async fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.read().await.keys().copied().collect()
    }

    /// Route one inbound frame to the owning node's dispatcher. Frames
    /// from unknown nodes provision them at the configured default
    /// version.
    pub async fn handle_frame(&self, frame: &Frame) -> Result<bool, CommandError> {
        if !self.nodes.read().await.contains_key(&frame.node) {
            self.add_node(frame.node, self.config.default_version).await;
        }

        let dispatcher = {
            let nodes = self.nodes.read().await;
            match nodes.get(&frame.node) {
                Some(entry) => entry.dispatcher.clone(),
                None => return Ok(false),
            }
        };
        dispatcher.dispatch(&frame.payload, 1).await
    }

    /// Park an application command for a node's next wake window.
    pub async fn queue_command(
        &self,
        node: NodeId,
        payload: Bytes,
        delivery: DeliveryClass,
    ) -> Result<()> {
        let wake = self
            .wake_handle(node)
            .await
            .ok_or_else(|| anyhow!("unknown node: {node}"))?;
        wake.queue_msg(OutboundCommand {
            node,
            payload,
            delivery,
        })
        .await;
        Ok(())
    }

    /// Program a node's wake interval; rejected if outside the range the
    /// node declared.
    pub async fn set_wake_interval(&self, node: NodeId, seconds: u32) -> Result<()> {
        let wake = self
            .wake_handle(node)
            .await
            .ok_or_else(|| anyhow!("unknown node: {node}"))?;
        wake.set_value(WAKE_INTERVAL_INDEX, seconds).await?;
        Ok(())
    }

    pub async fn is_awake(&self, node: NodeId) -> bool {
        match self.wake_handle(node).await {
            Some(wake) => wake.is_awake().await,
            None => false,
        }
    }

    async fn wake_handle(&self, node: NodeId) -> Option<WakeUp> {
        self.nodes.read().await.get(&node).map(|e| e.wake.clone())
    }
}
