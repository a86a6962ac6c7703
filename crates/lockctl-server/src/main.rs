//! lockctl-server binary entry point

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use lockctl_core::config::Config;
use lockctl_server::LockServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "lockctl-server", version, about = "HTTP facade for BLE smart locks")]
struct Args {
    /// Config file path (default: $LOCKCTL_CONFIG, then ./lockctl.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(long, env = "LOCKCTL_LISTEN_ADDR")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_from(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut server = LockServer::new(config);
    if let Some(addr) = args.listen {
        server = server.with_listen_addr(addr);
    }
    server.run().await
}
