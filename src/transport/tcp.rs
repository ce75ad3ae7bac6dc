//! TCP transport toward the radio bridge

use super::traits::{OutboundCommand, Transport};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::trace;
use wakehub_shared::codec::{self, Frame};

/// Writes codec-framed commands to the bridge connection.
pub struct TcpTransport {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl TcpTransport {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn forward(&self, item: OutboundCommand) -> Result<()> {
        let delivery = item.delivery;
        let frame = Frame {
            node: item.node,
            payload: item.payload,
        };
        let encoded = codec::encode(&frame)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;

        trace!(
            node = frame.node,
            class = ?delivery,
            bytes = encoded.len(),
            "forwarded command"
        );
        Ok(())
    }
}
