use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use iwa_model::{router, FixedPolicy, DEFAULT_TARGET_URL};

/// Reference fixed-policy model serving /health and /act
#[derive(Parser)]
#[command(name = "iwa-model")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Address to bind to
    #[arg(long, env = "IWA_MODEL_BIND", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "IWA_MODEL_PORT", default_value_t = 9000)]
    port: u16,

    /// URL returned as the step-0 NavigateAction
    #[arg(long, env = "IWA_MODEL_TARGET_URL", default_value = DEFAULT_TARGET_URL)]
    target_url: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    iwa_core::init_tracing(cli.json, level);

    let addr = SocketAddr::new(cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, target_url = %cli.target_url, "model listening");

    axum::serve(listener, router(FixedPolicy::new(cli.target_url)))
        .await
        .context("HTTP server failed")?;
    Ok(())
}
