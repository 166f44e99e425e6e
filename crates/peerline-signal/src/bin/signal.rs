//! Peerline Signal Server
//!
//! WebSocket signaling server for peer discovery and call negotiation.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (port 3000, or $PORT)
//! peerline-signal
//!
//! # Serve a web client from the same port
//! peerline-signal --port 8080 --static-dir ./web
//!
//! # Explicit config file
//! peerline-signal --config /etc/peerline/config.toml
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use peerline_core::Config;
use peerline_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "peerline-signal")]
#[command(about = "Peerline signaling server for peer discovery and calls")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Directory of static files served over plain HTTP
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Tell callers when the peer they are calling is not connected
    #[arg(long)]
    notify_offline: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print a sample config file and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective config to this path and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load(),
    };

    // Command line wins over the file
    if let Some(port) = args.port {
        config.signal.port = port;
    }
    if let Some(bind) = args.bind {
        config.signal.bind = bind;
    }
    if let Some(dir) = args.static_dir {
        config.signal.static_dir = Some(dir);
    }
    if args.notify_offline {
        config.signal.notify_offline = true;
    }

    if let Some(path) = &args.write_config {
        config
            .save_to(path)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        return Ok(());
    }

    info!("Starting Peerline Signal Server");
    match &config.signal.static_dir {
        Some(dir) => info!("Serving static files from {:?}", dir),
        None => info!("No static directory configured"),
    }
    if config.signal.notify_offline {
        info!("Offline notices enabled for call requests");
    }

    let server = SignalServer::new(config.signal);
    server.serve().await?;

    Ok(())
}
