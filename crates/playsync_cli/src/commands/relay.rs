//! Relay command implementation.

use playsync_relay::{RelayConfig, RelayService};
use std::net::SocketAddr;
use tracing::info;

/// Runs the relay until Ctrl-C.
pub async fn run(
    bind: SocketAddr,
    max_connections: usize,
    handshake: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = RelayConfig::new(bind).with_max_connections(max_connections);
    if let Some(message) = handshake {
        config = config.with_handshake_message(message);
    }

    let service = RelayService::bind(config).await?;
    println!("Relay listening on ws://{}", service.local_addr()?);

    service
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
            }
        })
        .await?;
    Ok(())
}
