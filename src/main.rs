mod command;
mod config;
mod node;
mod timer;
mod transport;
mod values;

use config::HubConfig;
use node::NodeRegistry;
use std::sync::Arc;
use timer::TokioTimer;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use transport::TcpTransport;
use values::ValueStore;
use wakehub_shared::codec::FrameDecoder;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = HubConfig::default();
    let timer = Arc::new(TokioTimer::new());
    let values = Arc::new(ValueStore::new());

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("Hub listening for radio bridge on {}", config.listen_addr);

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("Radio bridge connected from {}", addr);

        let (mut reader, writer) = socket.into_split();
        let transport = Arc::new(TcpTransport::new(writer));
        let registry = NodeRegistry::new(
            config.clone(),
            transport,
            timer.clone(),
            values.clone(),
        );

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 4096];

        'bridge: loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    info!("Radio bridge disconnected: {}", addr);
                    break 'bridge;
                }
                Ok(n) => {
                    decoder.extend(&buf[..n]);

                    // Process all complete frames
                    loop {
                        match decoder.decode_next() {
                            Ok(Some(frame)) => match registry.handle_frame(&frame).await {
                                Ok(true) => {}
                                Ok(false) => {
                                    warn!(node = frame.node, "frame not handled");
                                }
                                Err(e) => {
                                    warn!(node = frame.node, error = %e, "frame rejected");
                                }
                            },
                            Ok(None) => break,
                            Err(e) => {
                                error!("Decode error from {}: {}", addr, e);
                                break 'bridge;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Read error from {}: {}", addr, e);
                    break 'bridge;
                }
            }
        }

        // The bridge is gone: tear every node down, cancelling their timers
        registry.remove_all().await;
    }
}
