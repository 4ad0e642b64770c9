//! Relay daemon entry point.
//!
//! All state is in memory by design: restarting the relay reissues
//! pairing codes as agents re-register, and mobiles with stale session
//! tokens fall back to re-pairing.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use claude_mobile_relay::{RelayConfig, RelayServer};

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port: u16 = match std::env::var("RELAY_PORT") {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("RELAY_PORT is not a valid port: {raw}"))?,
        Err(_) => 8080,
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port,
        "starting relay daemon"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(port))?;

    tracing::info!("relay shut down cleanly");
    Ok(())
}

async fn run(port: u16) -> anyhow::Result<()> {
    let server = RelayServer::new(RelayConfig {
        port,
        ..RelayConfig::default()
    });

    let runner = Arc::clone(&server);
    let handle = tokio::spawn(async move { runner.run().await });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");

    server.shutdown();
    handle.await??;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
