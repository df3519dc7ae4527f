//! WebSocket sync client.
//!
//! Provides:
//! - Connection lifecycle (connect, join, disconnect)
//! - Debounced delta sending computed from whole-scene edits
//! - Throttled pointer updates
//! - Reconciliation of server updates into a local board
//!
//! One driver task owns the socket and the [`Reconciler`]; the
//! [`SyncClient`] handle talks to it over a command channel, and the
//! application reads [`SyncEvent`]s from the event channel.

use futures_util::{SinkExt, StreamExt};
use inkboard_core::{rebase_scene, Board, BoardUpdateResponse, Element, ElementId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ClientConfig;
use crate::presence::Collaborator;
use crate::protocol::{ClientMessage, ErrorCode, ProtocolError, ServerMessage};
use crate::reconcile::{Reconciled, Reconciler};
use crate::timing::{sleep_until, Debounce, Throttle};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The server sent a full board; local state was replaced.
    Synced(Board),
    /// A peer's delta was merged into local state.
    RemoteChange {
        board: Board,
        locked: HashSet<ElementId>,
    },
    /// Collaborators currently on the board
    Presence(Vec<Collaborator>),
    /// The server rejected a request
    ServerError { code: ErrorCode, message: String },
    Pong,
    /// Connection lost
    Disconnected,
}

enum Command {
    Edit(Vec<Element>),
    Pointer(f64, f64),
    Flush,
    Ping,
    Snapshot {
        reply: oneshot::Sender<(Option<Board>, HashSet<ElementId>)>,
    },
    Close,
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// The sync client.
pub struct SyncClient {
    collaborator: Collaborator,
    slug: String,
    server_url: String,
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the driver task
    commands: Option<mpsc::Sender<Command>>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(collaborator: Collaborator, slug: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self::with_config(collaborator, slug, server_url, ClientConfig::default())
    }

    pub fn with_config(
        collaborator: Collaborator,
        slug: impl Into<String>,
        server_url: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            collaborator,
            slug: slug.into(),
            server_url: server_url.into(),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            commands: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect and join the board.
    ///
    /// The first event after a successful join is [`SyncEvent::Synced`];
    /// an unknown board yields [`SyncEvent::ServerError`] with
    /// [`ErrorCode::NotFound`].
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let mut driver = Driver {
            ws: ws_stream,
            commands: cmd_rx,
            events: self.event_tx.clone(),
            reconciler: Reconciler::new(self.collaborator.id.clone()),
            deltas: Debounce::new(self.config.delta_debounce),
            pointer: Throttle::new(self.config.pointer_throttle),
        };
        driver
            .send(&ClientMessage::join(self.slug.clone(), self.collaborator.clone()))
            .await?;

        self.commands = Some(cmd_tx);
        *self.state.write().await = ConnectionState::Connected;
        log::info!("{} connected to {} for {}", self.collaborator.id, self.server_url, self.slug);

        let state = self.state.clone();
        tokio::spawn(async move {
            driver.run().await;
            *state.write().await = ConnectionState::Disconnected;
            let _ = driver.events.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Report the current local scene. Changes are diffed and sent after
    /// the debounce delay; only the latest scene matters.
    ///
    /// Peer deltas that arrive while a scene is buffered are folded into
    /// it. A scene built before the caller saw a [`SyncEvent::RemoteChange`]
    /// is not, so build scenes from the latest event's board.
    pub async fn edit(&self, elements: Vec<Element>) -> Result<(), ProtocolError> {
        self.command(Command::Edit(elements)).await
    }

    /// Report the local pointer position. Throttled.
    pub async fn move_pointer(&self, x: f64, y: f64) -> Result<(), ProtocolError> {
        self.command(Command::Pointer(x, y)).await
    }

    /// Send any debounced edits now.
    pub async fn flush(&self) -> Result<(), ProtocolError> {
        self.command(Command::Flush).await
    }

    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        self.command(Command::Ping).await
    }

    /// Last-known board, `None` before the first full snapshot.
    pub async fn board(&self) -> Option<Board> {
        self.snapshot().await.and_then(|(board, _)| board)
    }

    /// Elements other collaborators hold locked.
    pub async fn locked_ids(&self) -> HashSet<ElementId> {
        self.snapshot().await.map(|(_, locked)| locked).unwrap_or_default()
    }

    /// Flush pending edits and close the connection.
    pub async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        let result = self.command(Command::Close).await;
        self.commands = None;
        result
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn collaborator(&self) -> &Collaborator {
        &self.collaborator
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn snapshot(&self) -> Option<(Option<Board>, HashSet<ElementId>)> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }

    async fn command(&self, cmd: Command) -> Result<(), ProtocolError> {
        match &self.commands {
            Some(tx) => tx.send(cmd).await.map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

/// Owns the socket and local state of one connected client.
struct Driver {
    ws: WsStream,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SyncEvent>,
    reconciler: Reconciler,
    deltas: Debounce<Vec<Element>>,
    pointer: Throttle<(f64, f64)>,
}

impl Driver {
    async fn run(&mut self) {
        loop {
            let result = tokio::select! {
                frame = self.ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.on_server_frame(&text).await;
                        Ok(())
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("{}: server closed the connection", self.reconciler.client_id());
                        break;
                    }
                    Some(Err(e)) => {
                        log::warn!("{}: WebSocket error: {e}", self.reconciler.client_id());
                        break;
                    }
                    _ => Ok(()),
                },

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Edit(elements)) => {
                        self.deltas.push(elements, Instant::now());
                        Ok(())
                    }
                    Some(Command::Pointer(x, y)) => match self.pointer.push((x, y), Instant::now()) {
                        Some((x, y)) => self.send(&ClientMessage::Pointer { x, y }).await,
                        None => Ok(()),
                    },
                    Some(Command::Flush) => self.send_edits().await,
                    Some(Command::Ping) => self.send(&ClientMessage::Ping).await,
                    Some(Command::Snapshot { reply }) => {
                        let board = self.reconciler.board().cloned();
                        let _ = reply.send((board, self.reconciler.locked_ids().clone()));
                        Ok(())
                    }
                    Some(Command::Close) | None => {
                        if let Err(e) = self.send_edits().await {
                            log::warn!("Dropping unsent edits on close: {e}");
                        }
                        let _ = self.ws.close(None).await;
                        break;
                    }
                },

                _ = sleep_until(self.deltas.deadline()) => match self.deltas.poll(Instant::now()) {
                    Some(elements) => self.send_scene(&elements).await,
                    None => Ok(()),
                },

                _ = sleep_until(self.pointer.deadline()) => match self.pointer.poll(Instant::now()) {
                    Some((x, y)) => self.send(&ClientMessage::Pointer { x, y }).await,
                    None => Ok(()),
                },
            };

            if let Err(e) = result {
                log::warn!("{}: send failed: {e}", self.reconciler.client_id());
                break;
            }
        }
    }

    async fn on_server_frame(&mut self, text: &str) {
        let msg = match ServerMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("{}: undecodable frame: {e}", self.reconciler.client_id());
                return;
            }
        };

        let event = match msg {
            ServerMessage::Board { update } => {
                let peer_delta = match &update {
                    BoardUpdateResponse::Delta { delta } if self.deltas.is_pending() => Some(delta.clone()),
                    _ => None,
                };
                match self.reconciler.handle_response(update) {
                    Ok(Reconciled::Replaced) => {
                        // Server state wins over anything not yet sent.
                        self.deltas.take();
                        self.reconciler.board().cloned().map(SyncEvent::Synced)
                    }
                    Ok(Reconciled::Merged) => {
                        // The buffered scene predates this delta.
                        if let Some(delta) = &peer_delta {
                            self.deltas.map_pending(|scene| rebase_scene(scene, delta));
                        }
                        self.reconciler.board().cloned().map(|board| SyncEvent::RemoteChange {
                            board,
                            locked: self.reconciler.locked_ids().clone(),
                        })
                    }
                    Ok(Reconciled::SelfEcho) => None,
                    Err(e) => {
                        log::warn!("{}: {e}", self.reconciler.client_id());
                        None
                    }
                }
            }
            ServerMessage::Presence { collaborators, .. } => Some(SyncEvent::Presence(collaborators)),
            ServerMessage::Error { code, message } => Some(SyncEvent::ServerError { code, message }),
            ServerMessage::Pong => Some(SyncEvent::Pong),
        };

        if let Some(event) = event {
            let _ = self.events.send(event).await;
        }
    }

    async fn send_edits(&mut self) -> Result<(), ProtocolError> {
        match self.deltas.take() {
            Some(elements) => self.send_scene(&elements).await,
            None => Ok(()),
        }
    }

    async fn send_scene(&mut self, elements: &[Element]) -> Result<(), ProtocolError> {
        if !self.reconciler.is_synced() {
            log::debug!("{}: edit before first snapshot dropped", self.reconciler.client_id());
            return Ok(());
        }
        match self.reconciler.local_change(elements) {
            Some(delta) => self.send(&ClientMessage::Delta { delta }).await,
            None => Ok(()),
        }
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        let text = msg.encode()?;
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = SyncClient::new(Collaborator::new("u1", "TestUser"), "s1", "ws://localhost:9100");
        assert_eq!(client.collaborator().name, "TestUser");
        assert_eq!(client.slug(), "s1");
        assert_eq!(client.server_url(), "ws://localhost:9100");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = SyncClient::new(Collaborator::new("u1", "TestUser"), "s1", "ws://localhost:9100");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.board().await.is_none());
        assert!(client.locked_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_commands_fail_before_connect() {
        let client = SyncClient::new(Collaborator::new("u1", "TestUser"), "s1", "ws://localhost:9100");
        assert_eq!(client.edit(vec![]).await, Err(ProtocolError::ConnectionClosed));
        assert_eq!(client.move_pointer(1.0, 2.0).await, Err(ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = format!("ws://127.0.0.1:{port}");
        let mut client = SyncClient::new(Collaborator::new("u1", "TestUser"), "s1", url);
        assert_eq!(client.connect().await, Err(ProtocolError::ConnectionClosed));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = SyncClient::new(Collaborator::new("u1", "TestUser"), "s1", "ws://localhost:9100");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
