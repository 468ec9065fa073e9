//! Binary relay server.

use clap::Parser;
use relay_server::config::{Cli, Config};
use relay_server::server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        bind = %config.bind_addr,
        port = config.port,
        transport = %config.transport,
        max_clients = config.max_clients,
        queue_capacity = config.queue_capacity,
        evict_after_drops = ?config.evict_after_drops,
        "starting relay-server"
    );

    tokio::select! {
        res = server::run(config) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, exiting");
            Ok(())
        }
    }
}
