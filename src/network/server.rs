//! TCP Game Server
//!
//! Accepts connections and runs one task per client: a reader loop that
//! feeds the session dispatcher plus a writer task fed by the session's
//! outbox channel. A session failure or disconnect unwinds only its own
//! task; the acceptor and every other session keep running.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::game::engine::SharedDungeon;
use crate::network::session::{Flow, Outbox, Session};
use crate::DEFAULT_PORT;

/// Server configuration.
///
/// Deserializable from a JSON file; every field falls back to its
/// default when absent.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Map file to load instead of the built-in map.
    pub map_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 64,
            map_path: None,
        }
    }
}

/// Config loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid config JSON.
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Game server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying socket error.
        source: std::io::Error,
    },

    /// The accept loop failed unrecoverably.
    #[error("accept failed: {0}")]
    Accept(#[from] std::io::Error),
}

/// The game server: one shared world, one task per connection.
pub struct GameServer {
    config: ServerConfig,
    dungeon: SharedDungeon,
    active: Arc<AtomicUsize>,
}

impl GameServer {
    /// Create a server for an existing world.
    pub fn new(config: ServerConfig, dungeon: SharedDungeon) -> Self {
        Self {
            config,
            dungeon,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the configured address and serve until the process exits.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr,
                source,
            })?;
        info!("game server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    ///
    /// Split from [`run`](GameServer::run) so tests can bind an ephemeral
    /// port themselves.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = listener.accept().await?;

            if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
                warn!("connection limit reached, rejecting {addr}");
                continue;
            }

            info!("new connection from {addr}");
            self.active.fetch_add(1, Ordering::SeqCst);
            let dungeon = self.dungeon.clone();
            let active = self.active.clone();
            tokio::spawn(async move {
                handle_connection(dungeon, stream, addr).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }
}

/// One connection from accept to cleanup.
///
/// The writer task serializes everything the outbox emits onto the
/// socket; the reader loop below feeds the session until the peer
/// disconnects, quits, or breaks the session contract. Removal from the
/// world runs exactly once on the way out, whichever exit was taken.
async fn handle_connection(dungeon: SharedDungeon, stream: TcpStream, addr: SocketAddr) {
    let conn_id = Uuid::new_v4();
    debug!("connection {conn_id} is {addr}");

    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(write_half, rx));

    let outbox = Outbox::new(tx);
    let mut session = Session::new(dungeon, outbox);

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match session.handle_line(&line) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => {
                    debug!("connection {conn_id} quit");
                    break;
                }
                Err(e) => {
                    error!("connection {conn_id} violated the session contract: {e}");
                    break;
                }
            },
            Ok(None) => {
                debug!("connection {conn_id} closed by peer");
                break;
            }
            Err(e) => {
                warn!("read error on connection {conn_id}: {e}");
                break;
            }
        }
    }

    session.leave();

    // Dropping the session drops the last sender; the writer drains what
    // is already queued and exits.
    drop(session);
    let _ = writer.await;
    info!("connection {conn_id} cleaned up");
}

/// Writer task: one wire message per channel item, newline-terminated.
async fn write_lines(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        if write_half.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if write_half.write_all(b"\n").await.is_err() {
            break;
        }
    }
}
