use chat_relay::config::Args;
use chat_relay::server::{init_logging, startup};
use clap::Parser;
use tokio::signal;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config();
    init_logging(config.log_level);

    let relay = config.build_relay().map_err(|e| {
        log::error!("Failed to build chat relay: {}", e);
        e
    })?;

    tokio::select! {
        res = startup(config, relay) => res?,
        _ = signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down");
        }
    }
    Ok(())
}
