use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use huddle_relay::cli::{Cli, Commands};
use huddle_relay::tap::{run_tap, TapFilter};
use huddle_relay::{serve, RelayConfig, RelayState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG wins; otherwise log connection lifecycle at info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Tap { url, from, dest, raw }) = cli.command {
        if let Err(e) = run_tap(&url, TapFilter { from, dest }, raw, std::io::stdout()).await {
            error!("tap error: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    let config = cli.apply(RelayConfig::from_env());
    let addr = config.socket_addr();
    info!(
        scope = ?config.scope,
        max_message_bytes = config.max_message_bytes,
        "starting huddle relay"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("huddle relay listening on {}", addr);

    let state = RelayState::new(&config);
    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await
    .context("relay server failed")?;

    Ok(())
}
