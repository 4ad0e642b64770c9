//! Agent daemon entry point.
//!
//! Two modes: `setup` (interactive configuration) and the default daemon.
//! Exit codes: 0 on normal shutdown, 1 on missing configuration.

mod app;
mod config;
mod setup;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if std::env::args().nth(1).as_deref() == Some("setup") {
        return setup::run();
    }

    let config = config::Config::load()?;
    if !config.is_complete() {
        eprintln!("claude-mobile-agent: missing configuration (relay URL or forge token).");
        eprintln!(
            "Run `claude-mobile-agent setup`, or set CLAUDE_MOBILE_RELAY_URL and \
             CLAUDE_MOBILE_GITHUB_TOKEN."
        );
        std::process::exit(1);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        agent = %config.agent_id,
        "starting agent"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}
