//! Video wall server — coordinates display screens over WebSocket.
//!
//! Configuration comes from `VIDWALL_*` environment variables (see
//! [`ServerConfig::from_env`]); logging from `RUST_LOG`, default `info`.

use log::info;
use vidwall_sync::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env()?;
    info!(
        "Starting video wall server: {}x{} grid, uploads in {}",
        config.grid_rows,
        config.grid_cols,
        config.upload_dir.display()
    );

    let server = SyncServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
