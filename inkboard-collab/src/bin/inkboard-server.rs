//! Standalone board sync server.
//!
//! Configured through `INKBOARD_*` environment variables (or a `.env`
//! file). Persists boards on Ctrl-C before exiting.

use inkboard_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    log::info!("Starting inkboard server...");
    let server = SyncServer::open(config)?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutdown requested, persisting boards");
        }
    }

    server.shutdown().await;
    Ok(())
}
