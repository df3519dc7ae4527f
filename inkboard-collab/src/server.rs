//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── PresenceTracker ── presence topic (slug)
//!            ├── connection task ── SyncHub
//! Client B ──┘   (one per socket)    └── BoardSessions ──── board topic (slug)
//!                                          │
//!                                          └── BoardStore (RocksDB or memory)
//! ```
//!
//! Each connection task runs one `select!` loop over the socket, the
//! board's update topic and its presence topic. Frames are JSON text, see
//! [`crate::protocol`]. On disconnect the task drops its subscriptions and
//! calls [`SyncHub::leave`], which starts the board's grace period once the
//! last collaborator is gone.

use futures_util::{Sink, SinkExt, StreamExt};
use inkboard_core::BoardUpdateResponse;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::config::ServerConfig;
use crate::hub::SyncHub;
use crate::presence::PresenceEvent;
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::session::{BoardSessions, SessionError};
use crate::storage::{BoardStore, MemoryBoardStore, RocksBoardStore, StoreConfig, StoreError};

type ConnResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub rejected_messages: u64,
    /// Full snapshots re-sent to subscribers that fell behind
    pub resyncs: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<SyncHub>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server over an explicit store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn BoardStore>) -> Self {
        let sessions = BoardSessions::new(store, config.session_config());
        let hub = Arc::new(SyncHub::new(sessions, config.create_missing_boards));
        Self {
            config,
            hub,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create a server, opening RocksDB at `storage_path` when set and
    /// keeping boards in memory otherwise.
    pub fn open(config: ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn BoardStore> = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Arc::new(RocksBoardStore::open(store_config)?)
            }
            None => {
                log::warn!("No storage path configured, boards live in memory only");
                Arc::new(MemoryBoardStore::new())
            }
        };
        Ok(Self::with_store(config, store))
    }

    /// Bind and accept connections until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
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

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<SyncHub>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> ConnResult {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // (slug, collaborator id) once joined
        let mut member: Option<(String, String)> = None;
        let mut updates_rx: Option<broadcast::Receiver<Arc<BoardUpdateResponse>>> = None;
        let mut presence_rx: Option<broadcast::Receiver<PresenceEvent>> = None;

        let result: ConnResult = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                stats.write().await.total_messages += 1;
                                let msg = match ClientMessage::decode(&text) {
                                    Ok(msg) => msg,
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        stats.write().await.rejected_messages += 1;
                                        send(&mut ws_sender, &ServerMessage::error(ErrorCode::InvalidMessage, e.to_string())).await?;
                                        continue;
                                    }
                                };

                                match msg {
                                    ClientMessage::Join { slug, collaborator } => {
                                        if member.is_some() {
                                            send(&mut ws_sender, &ServerMessage::error(ErrorCode::InvalidMessage, "already joined")).await?;
                                            continue;
                                        }
                                        let id = collaborator.id.clone();
                                        match hub.join(&slug, collaborator).await {
                                            Ok(joined) => {
                                                updates_rx = Some(joined.updates);
                                                presence_rx = Some(joined.presence);
                                                member = Some((slug, id));
                                                let full = BoardUpdateResponse::full(joined.board);
                                                send(&mut ws_sender, &ServerMessage::board(full)).await?;
                                            }
                                            Err(SessionError::NotFound(slug)) => {
                                                send(&mut ws_sender, &ServerMessage::error(
                                                    ErrorCode::NotFound,
                                                    format!("board does not exist: {slug}"),
                                                )).await?;
                                            }
                                            Err(e) => {
                                                log::error!("Join of {slug} from {addr} failed: {e}");
                                                send(&mut ws_sender, &ServerMessage::error(ErrorCode::Internal, "board unavailable")).await?;
                                            }
                                        }
                                    }

                                    ClientMessage::Delta { delta } => {
                                        let Some((slug, _)) = &member else {
                                            send(&mut ws_sender, &ServerMessage::error(ErrorCode::NotJoined, "join a board first")).await?;
                                            continue;
                                        };
                                        if let Err(e) = hub.apply(slug, delta).await {
                                            log::error!("Failed to apply delta to {slug} from {addr}: {e}");
                                        }
                                    }

                                    ClientMessage::Pointer { x, y } => {
                                        if let Some((slug, id)) = &member {
                                            hub.move_pointer(slug, id, x, y).await;
                                        }
                                    }

                                    ClientMessage::Ping => {
                                        send(&mut ws_sender, &ServerMessage::Pong).await?;
                                    }
                                }
                            }

                            Some(Ok(Message::Binary(_))) => {
                                log::warn!("Ignoring binary frame from {addr}");
                                stats.write().await.rejected_messages += 1;
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    update = recv_or_pending(&mut updates_rx) => {
                        match update {
                            Ok(update) => {
                                send(&mut ws_sender, &ServerMessage::board((*update).clone())).await?;
                            }
                            Err(RecvError::Lagged(n)) => {
                                let Some((slug, _)) = &member else { continue };
                                log::warn!("{addr} lagged by {n} updates on {slug}, resending board");
                                match hub.sessions().get(slug).await {
                                    Ok(board) => {
                                        stats.write().await.resyncs += 1;
                                        send(&mut ws_sender, &ServerMessage::board(BoardUpdateResponse::full(board))).await?;
                                    }
                                    Err(e) => log::error!("Resync of {slug} failed: {e}"),
                                }
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }

                    event = recv_or_pending(&mut presence_rx) => {
                        let Some((slug, _)) = &member else { continue };
                        let collaborators = match event {
                            Ok(event) => event.collaborators,
                            Err(RecvError::Lagged(_)) => hub.presence().collaborators(slug),
                            Err(RecvError::Closed) => {
                                presence_rx = Some(hub.presence().subscribe(slug).await);
                                hub.presence().collaborators(slug)
                            }
                        };
                        let frame = ServerMessage::Presence { slug: slug.clone(), collaborators };
                        send(&mut ws_sender, &frame).await?;
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        // Cleanup: unsubscribe first so the board topic can be released.
        drop(updates_rx);
        drop(presence_rx);
        if let Some((slug, id)) = member {
            hub.leave(&slug, &id).await;
        }
        stats.write().await.active_connections -= 1;

        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &Arc<SyncHub> {
        &self.hub
    }

    /// Persist every loaded board.
    pub async fn shutdown(&self) {
        self.hub.shutdown().await;
    }
}

async fn send<S>(sink: &mut S, msg: &ServerMessage) -> ConnResult
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = msg.encode()?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Receive from an optional subscription; waits forever before `join`.
async fn recv_or_pending<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
