//! WebSocket server for the video wall.
//!
//! Architecture:
//! ```text
//! Screen A ──┐                                              ┌──► socket A
//! Screen B ──┼── Hub ── Coordinator ── broadcast(Envelope) ─┼──► socket B
//! Admin    ──┘   (one mutex)                                └──► socket C
//! ```
//!
//! Every connection gets a [`ConnectionId`] and a broadcast receiver.
//! Inbound frames are decoded, then applied to the coordinator under the
//! hub lock; the coordinator publishes into the broadcast group without
//! awaiting. Each connection task forwards the envelopes addressed to it,
//! in publish order, so a slow screen only delays itself.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

use crate::broadcast::BroadcastGroup;
use crate::coordinator::Coordinator;
use crate::protocol::{ClientMessage, PlaybackCommand, ProtocolError, ServerMessage};
use crate::registry::ConnectionId;
use crate::topology::GridConfig;
use crate::upload::{DiskUploadStore, UploadError, UploadStore};

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Messages a connection may fall behind before it lags
    pub broadcast_capacity: usize,
    /// Where uploaded videos are written
    pub upload_dir: PathBuf,
    /// Initial grid
    pub grid_rows: u32,
    pub grid_cols: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".to_string(),
            broadcast_capacity: 256,
            upload_dir: PathBuf::from("./uploads"),
            grid_rows: 3,
            grid_cols: 3,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {var}={value:?}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(var, value, e.to_string()))
}

/// Parse `RxC` (e.g. `3x3`, `2X4`).
fn parse_grid(value: &str) -> Result<(u32, u32), ConfigError> {
    let (rows, cols) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| ConfigError::invalid("VIDWALL_GRID", value, "expected ROWSxCOLS"))?;
    let rows: u32 = parse_var("VIDWALL_GRID", rows)?;
    let cols: u32 = parse_var("VIDWALL_GRID", cols)?;
    if rows == 0 || cols == 0 {
        return Err(ConfigError::invalid("VIDWALL_GRID", value, "dimensions must be at least 1"));
    }
    Ok((rows, cols))
}

impl ServerConfig {
    /// Defaults overridden by `VIDWALL_*` environment variables.
    ///
    /// `VIDWALL_BIND` wins over `PORT`; `PORT` alone binds all interfaces.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("VIDWALL_BIND") {
            config.bind_addr = bind;
        } else if let Some(port) = lookup("PORT") {
            let port: u16 = parse_var("PORT", &port)?;
            config.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Some(v) = lookup("VIDWALL_BROADCAST_CAPACITY") {
            config.broadcast_capacity = parse_var("VIDWALL_BROADCAST_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("VIDWALL_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VIDWALL_GRID") {
            (config.grid_rows, config.grid_cols) = parse_grid(&v)?;
        }

        Ok(config)
    }

    /// Initial grid; falls back to 3×3 if a dimension is zero.
    pub fn grid(&self) -> GridConfig {
        GridConfig::new(self.grid_rows, self.grid_cols).unwrap_or_else(|| {
            log::warn!(
                "Ignoring invalid grid {}x{}, using default",
                self.grid_rows,
                self.grid_cols
            );
            GridConfig::default()
        })
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_frames: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

/// Coordinator plus the fan-out it publishes into, under one lock.
struct Hub {
    coordinator: Coordinator,
    group: BroadcastGroup,
}

/// The video wall server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<Mutex<Hub>>,
    stats: Arc<RwLock<ServerStats>>,
    uploads: DiskUploadStore,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let hub = Hub {
            coordinator: Coordinator::new(config.grid()),
            group: BroadcastGroup::new(config.broadcast_capacity),
        };
        let uploads = DiskUploadStore::new(config.upload_dir.clone());

        Self {
            config,
            hub: Arc::new(Mutex::new(hub)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
            uploads,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Video wall server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<Mutex<Hub>>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let conn_id: ConnectionId = Uuid::new_v4();
        let mut broadcast_rx = hub.lock().await.group.add_peer(conn_id);

        log::info!("WebSocket connection {conn_id} established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result: Result<(), ServerError> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += text.len() as u64;
                                }

                                match ClientMessage::decode(&text) {
                                    Ok(message) => {
                                        let mut guard = hub.lock().await;
                                        let hub = &mut *guard;
                                        hub.coordinator.handle(conn_id, message, &hub.group);
                                    }
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        stats.write().await.rejected_frames += 1;
                                        let reply = ServerMessage::error(e.to_string()).encode()?;
                                        ws_sender.send(Message::text(reply)).await?;
                                    }
                                }
                            }

                            Some(Ok(Message::Binary(data))) => {
                                let e = ProtocolError::UnsupportedFrame("binary");
                                log::warn!("Rejected {} byte binary frame from {addr}", data.len());
                                stats.write().await.rejected_frames += 1;
                                let reply = ServerMessage::error(e.to_string()).encode()?;
                                ws_sender.send(Message::text(reply)).await?;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection {conn_id} closed from {addr}");
                                break;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    msg = broadcast_rx.recv() => {
                        match msg {
                            Ok(envelope) => {
                                if envelope.is_for(&conn_id) {
                                    ws_sender.send(Message::text(String::clone(&envelope.text))).await?;
                                }
                            }
                            Err(RecvError::Lagged(n)) => {
                                log::warn!("Connection {conn_id} lagged by {n} messages, resending config");
                                // Queued behind anything published since, so it cannot be overtaken.
                                let mut guard = hub.lock().await;
                                let hub = &mut *guard;
                                hub.group.record_lag(n);
                                hub.coordinator.handle(conn_id, ClientMessage::GetConfig, &hub.group);
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        // Cleanup runs whether the socket closed cleanly or failed.
        {
            let mut guard = hub.lock().await;
            let hub = &mut *guard;
            hub.group.remove_peer(&conn_id);
            hub.coordinator.disconnect(conn_id, &hub.group);
        }
        stats.write().await.active_connections -= 1;

        result
    }

    /// Store an uploaded video and load it on the wall.
    pub async fn load_upload(&self, file_name: &str, bytes: &[u8]) -> Result<String, UploadError> {
        let url = self.uploads.store(file_name, bytes).await?;

        let mut guard = self.hub.lock().await;
        let hub = &mut *guard;
        hub.coordinator
            .command(PlaybackCommand::SetUrl { url: url.clone() }, &hub.group);

        Ok(url)
    }

    /// Read coordinator state under the hub lock.
    pub async fn inspect<T>(&self, f: impl FnOnce(&Coordinator) -> T) -> T {
        f(&self.hub.lock().await.coordinator)
    }

    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        let broadcast = self.hub.lock().await.group.stats();
        stats.messages_sent = broadcast.messages_sent;
        stats.messages_dropped = broadcast.messages_dropped;
        stats
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
