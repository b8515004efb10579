//! Porthole relay server
//!
//! Runs the proxy gateway standalone. In production the gateway router is
//! usually merged into a larger application that drives tunnel creation
//! through its own authenticated API; this binary serves it directly and can
//! pre-create a tunnel for local development.

use anyhow::{Context, Result};
use clap::Parser;
use porthole_gateway::{GatewayConfig, GatewayState};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Porthole - expose local TCP ports through a relay
#[derive(Parser, Debug)]
#[command(name = "porthole")]
#[command(about = "Porthole - expose local TCP ports through a relay")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "PORTHOLE_LISTEN", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Shared secret for signing access tokens and session cookies
    #[arg(long, env = "PORTHOLE_SECRET")]
    secret: String,

    /// Seconds to wait for a tunnel owner to supply a data connection
    #[arg(long, default_value = "10")]
    data_timeout_secs: u64,

    /// Always mark session cookies Secure (use behind a TLS terminator
    /// that does not set x-forwarded-proto)
    #[arg(long)]
    secure_cookies: bool,

    /// Create a development tunnel at startup and log its credentials
    #[arg(long)]
    dev_tunnel: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = GatewayConfig {
        data_connection_timeout: Duration::from_secs(cli.data_timeout_secs),
        secure_cookies: cli.secure_cookies,
        ..GatewayConfig::default()
    };
    let state = GatewayState::new(cli.secret.as_bytes(), config);

    if cli.dev_tunnel {
        let tunnel = state
            .registry
            .create("dev-user", "Developer", "dev-channel", 3000, Some("dev".to_string()))
            .context("Failed to create development tunnel")?;
        info!(tunnel_id = %tunnel.id, "Created development tunnel");
        info!(
            "Attach control: ws://{}/tunnel-connect/{}/control?token={}",
            cli.listen,
            tunnel.id,
            state.issue_control_token(&tunnel)
        );
        info!(
            "Visit: http://{}/tunnel/{}/?_tunnel_token={}",
            cli.listen,
            tunnel.id,
            state.issue_access_token(&tunnel.id, "dev-user")
        );
    }

    let app = porthole_gateway::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("Failed to bind {}", cli.listen))?;
    info!(listen = %cli.listen, "Porthole relay listening");

    axum::serve(listener, app)
        .await
        .context("Server terminated")?;
    Ok(())
}
