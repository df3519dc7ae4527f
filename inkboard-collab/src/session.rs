//! Board session cache: one actor per hot board.
//!
//! ```text
//!  get / update ──► BoardSessions ──(slug)──► mpsc ──► BoardSession task
//!                    registry                          │ owns the Board
//!                    (lookup only)                     ├─ merge (server side)
//!                                                      ├─ publish delta ──► RoomManager
//!                                                      ├─ flush every 60s ─► BoardStore
//!                                                      └─ evict after grace ► BoardStore
//! ```
//!
//! Each slug's board is owned by exactly one task, so read-modify-write of a
//! board is serialised by that task's queue while different slugs run in
//! parallel. The registry lock is held only to look up or insert a sender,
//! never across an await.
//!
//! Lifecycle per slug: `Unloaded → Loaded → Draining → Unloaded`.
//! - `Unloaded`: no task. The first `get`/`update` spawns one which loads
//!   from the store; a failed load retires the task immediately.
//! - `Loaded`: board in memory, periodic flush running.
//! - `Draining`: `complete` was called; the board is persisted and the task
//!   retires when the grace period lapses, unless `get` or `keep_alive`
//!   arrives first and cancels the pending eviction.
//!
//! A retiring task unregisters itself, closes its queue and bounces any
//! queued requests back to the caller, which retries against a fresh task.

use inkboard_core::{apply_to_board, Board, BoardDeltaUpdate, BoardUpdateResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use crate::broadcast::RoomManager;
use crate::storage::{BoardStore, StoreError};
use crate::timing::sleep_until;

/// Attempts before a request gives up on finding a live session.
const MAX_ATTEMPTS: usize = 4;

/// Session cache tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between background saves of a loaded board
    pub flush_interval: Duration,
    /// Delay between the last collaborator leaving and eviction
    pub eviction_grace: Duration,
    /// Buffered updates per subscriber
    pub broadcast_capacity: usize,
    /// Queued commands per session
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(60),
            eviction_grace: Duration::from_secs(30),
            broadcast_capacity: 256,
            command_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Loaded,
    Draining,
}

/// Errors surfaced by the session cache.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// No board persisted under this slug
    NotFound(String),
    /// `create` on an existing slug
    AlreadyExists(String),
    /// Storage failed while loading
    Persistence(StoreError),
    /// No session could take the request
    Closed,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotFound(slug) => write!(f, "Board does not exist: {slug}"),
            SessionError::AlreadyExists(slug) => write!(f, "Board already exists: {slug}"),
            SessionError::Persistence(e) => write!(f, "Persistence error: {e}"),
            SessionError::Closed => write!(f, "Session closed"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(slug) => SessionError::NotFound(slug),
            StoreError::AlreadyExists(slug) => SessionError::AlreadyExists(slug),
            other => SessionError::Persistence(other),
        }
    }
}

/// Why a session did not answer a request.
enum Rejection {
    /// The session retired; ask a fresh one.
    Retired,
    Failed(SessionError),
}

type Reply<T> = oneshot::Sender<Result<T, Rejection>>;

enum Command {
    Get { reply: Reply<Board> },
    Update { delta: BoardDeltaUpdate, reply: Reply<()> },
    Complete,
    KeepAlive,
    Flush { reply: Reply<()> },
    State { reply: oneshot::Sender<SessionState> },
    Shutdown { reply: oneshot::Sender<()> },
}

impl Command {
    /// Answer a command that reached a retiring session.
    fn bounce(self) {
        match self {
            Command::Get { reply } => {
                let _ = reply.send(Err(Rejection::Retired));
            }
            Command::Update { reply, .. } => {
                let _ = reply.send(Err(Rejection::Retired));
            }
            Command::Flush { reply } => {
                let _ = reply.send(Ok(()));
            }
            Command::State { reply } => {
                let _ = reply.send(SessionState::Unloaded);
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
            Command::Complete | Command::KeepAlive => {}
        }
    }
}

#[derive(Clone)]
struct SessionHandle {
    generation: u64,
    tx: mpsc::Sender<Command>,
}

type Topics = RoomManager<Arc<BoardUpdateResponse>>;

struct Shared {
    store: Arc<dyn BoardStore>,
    config: SessionConfig,
    topics: Arc<Topics>,
    registry: Mutex<HashMap<String, SessionHandle>>,
    next_generation: AtomicU64,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unregister(&self, slug: &str, generation: u64) {
        let mut registry = self.registry();
        if registry.get(slug).is_some_and(|h| h.generation == generation) {
            registry.remove(slug);
        }
    }
}

/// Handle to the session cache. Clones share the same sessions.
#[derive(Clone)]
pub struct BoardSessions {
    shared: Arc<Shared>,
}

impl BoardSessions {
    pub fn new(store: Arc<dyn BoardStore>, config: SessionConfig) -> Self {
        let topics = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            shared: Arc::new(Shared {
                store,
                config,
                topics,
                registry: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_store<S: BoardStore>(store: S, config: SessionConfig) -> Self {
        Self::new(Arc::new(store), config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Current board for `slug`, loading it if needed.
    ///
    /// Cancels a pending eviction.
    pub async fn get(&self, slug: &str) -> Result<Board, SessionError> {
        self.request(slug, |reply| Command::Get { reply }).await
    }

    /// Merge `delta` into the authoritative board and publish it.
    pub async fn update(&self, slug: &str, delta: BoardDeltaUpdate) -> Result<(), SessionError> {
        self.request(slug, |reply| Command::Update {
            delta: delta.clone(),
            reply,
        })
        .await
    }

    /// The last collaborator left: evict after the grace period.
    pub async fn complete(&self, slug: &str) {
        self.send_existing(slug, Command::Complete).await;
    }

    /// Cancel a pending eviction without loading anything.
    pub async fn keep_alive(&self, slug: &str) {
        self.send_existing(slug, Command::KeepAlive).await;
    }

    /// Persist `slug` now if it is loaded.
    pub async fn flush(&self, slug: &str) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        if !self.send_existing(slug, Command::Flush { reply }).await {
            return Ok(());
        }
        match rx.await {
            Ok(Ok(())) | Ok(Err(Rejection::Retired)) | Err(_) => Ok(()),
            Ok(Err(Rejection::Failed(e))) => Err(e),
        }
    }

    pub async fn state(&self, slug: &str) -> SessionState {
        let (reply, rx) = oneshot::channel();
        if !self.send_existing(slug, Command::State { reply }).await {
            return SessionState::Unloaded;
        }
        rx.await.unwrap_or(SessionState::Unloaded)
    }

    /// Persist a new board. Does not load it.
    pub async fn create(&self, slug: &str, board: Board) -> Result<(), SessionError> {
        self.shared.store.create_board(slug, board).await?;
        log::info!("Created board {slug}");
        Ok(())
    }

    /// Subscribe to `slug`'s update topic.
    pub async fn subscribe(&self, slug: &str) -> broadcast::Receiver<Arc<BoardUpdateResponse>> {
        self.shared.topics.subscribe(slug).await
    }

    /// Drop `slug`'s update topic if nobody listens any more.
    pub async fn release_topic(&self, slug: &str) -> bool {
        self.shared.topics.remove_if_empty(slug).await
    }

    /// Number of slugs with a live session.
    pub fn session_count(&self) -> usize {
        self.shared.registry().len()
    }

    /// Persist every loaded board and stop all sessions.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self.shared.registry().values().cloned().collect();
        for handle in handles {
            let (reply, rx) = oneshot::channel();
            if handle.tx.send(Command::Shutdown { reply }).await.is_ok() {
                let _ = rx.await;
            }
        }
        log::info!("Board sessions shut down");
    }

    /// Sender for `slug`, spawning a session if none is live.
    fn handle_for(&self, slug: &str) -> SessionHandle {
        let mut registry = self.shared.registry();
        if let Some(handle) = registry.get(slug) {
            return handle.clone();
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.shared.config.command_buffer.max(1));
        let session = BoardSession::new(slug, generation, &self.shared);
        tokio::spawn(session.run(rx));

        let handle = SessionHandle { generation, tx };
        registry.insert(slug.to_string(), handle.clone());
        log::debug!("Spawned session for {slug} (gen {generation})");
        handle
    }

    async fn request<T, F>(&self, slug: &str, make: F) -> Result<T, SessionError>
    where
        F: Fn(Reply<T>) -> Command,
    {
        for _ in 0..MAX_ATTEMPTS {
            let handle = self.handle_for(slug);
            let (reply, rx) = oneshot::channel();
            if handle.tx.send(make(reply)).await.is_err() {
                self.shared.unregister(slug, handle.generation);
                continue;
            }
            match rx.await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(Rejection::Failed(e))) => return Err(e),
                Ok(Err(Rejection::Retired)) | Err(_) => continue,
            }
        }
        Err(SessionError::Closed)
    }

    async fn send_existing(&self, slug: &str, cmd: Command) -> bool {
        let handle = self.shared.registry().get(slug).cloned();
        match handle {
            Some(handle) => {
                if let Err(mpsc::error::SendError(cmd)) = handle.tx.send(cmd).await {
                    self.shared.unregister(slug, handle.generation);
                    cmd.bounce();
                    return false;
                }
                true
            }
            None => {
                cmd.bounce();
                false
            }
        }
    }
}

/// The task owning one slug's board.
struct BoardSession {
    slug: String,
    generation: u64,
    board: Option<Board>,
    dirty: bool,
    evict_at: Option<Instant>,
    store: Arc<dyn BoardStore>,
    topics: Arc<Topics>,
    registry: Weak<Shared>,
    config: SessionConfig,
}

impl BoardSession {
    fn new(slug: &str, generation: u64, shared: &Arc<Shared>) -> Self {
        Self {
            slug: slug.to_string(),
            generation,
            board: None,
            dirty: false,
            evict_at: None,
            store: shared.store.clone(),
            topics: shared.topics.clone(),
            registry: Arc::downgrade(shared),
            config: shared.config.clone(),
        }
    }

    fn state(&self) -> SessionState {
        match (&self.board, self.evict_at) {
            (None, _) => SessionState::Unloaded,
            (Some(_), None) => SessionState::Loaded,
            (Some(_), Some(_)) => SessionState::Draining,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let period = self.config.flush_interval;
        let mut flush = tokio::time::interval_at(Instant::now() + period, period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else {
                        // Every handle is gone: the cache itself was dropped.
                        self.save("cache dropped").await;
                        break;
                    };
                    let was_loaded = self.board.is_some();
                    let retire = self.handle(cmd).await;
                    if !was_loaded && self.board.is_some() {
                        flush.reset();
                    }
                    if retire {
                        break;
                    }
                }
                _ = flush.tick(), if self.board.is_some() => {
                    if self.dirty {
                        self.save("periodic flush").await;
                    }
                }
                _ = sleep_until(self.evict_at) => {
                    if self.evict().await {
                        break;
                    }
                }
            }
        }

        self.retire(&mut rx).await;
    }

    /// Returns true when the session must retire.
    async fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Get { reply } => match self.ensure_loaded().await {
                Ok(board) => {
                    let board = board.clone();
                    self.cancel_eviction();
                    let _ = reply.send(Ok(board));
                    false
                }
                Err(e) => {
                    let _ = reply.send(Err(Rejection::Failed(e)));
                    true
                }
            },
            Command::Update { delta, reply } => match self.ensure_loaded().await {
                Ok(board) => {
                    let merged = apply_to_board(board, &delta, false);
                    self.board = Some(merged);
                    self.dirty = true;
                    let heard = self
                        .topics
                        .publish(&self.slug, Arc::new(BoardUpdateResponse::delta(delta)))
                        .await;
                    log::trace!("Applied delta to {} ({heard} subscribers)", self.slug);
                    let _ = reply.send(Ok(()));
                    false
                }
                Err(e) => {
                    let _ = reply.send(Err(Rejection::Failed(e)));
                    true
                }
            },
            Command::Complete => {
                if self.board.is_some() && self.evict_at.is_none() {
                    self.evict_at = Some(Instant::now() + self.config.eviction_grace);
                    log::info!(
                        "Board {} draining, eviction in {:?}",
                        self.slug,
                        self.config.eviction_grace
                    );
                }
                false
            }
            Command::KeepAlive => {
                self.cancel_eviction();
                false
            }
            Command::Flush { reply } => {
                let result = match self.board.clone() {
                    Some(board) => self
                        .store
                        .save_board(&self.slug, board)
                        .await
                        .map(|()| self.dirty = false)
                        .map_err(|e| Rejection::Failed(SessionError::Persistence(e))),
                    None => Ok(()),
                };
                let _ = reply.send(result);
                false
            }
            Command::State { reply } => {
                let _ = reply.send(self.state());
                false
            }
            Command::Shutdown { reply } => {
                if self.dirty {
                    self.save("shutdown").await;
                }
                self.board = None;
                let _ = reply.send(());
                true
            }
        }
    }

    async fn ensure_loaded(&mut self) -> Result<&Board, SessionError> {
        if self.board.is_none() {
            let board = self.store.load_board(&self.slug).await?;
            log::info!("Loaded board {} ({} elements)", self.slug, board.len());
            self.dirty = false;
            self.board = Some(board);
        }
        self.board.as_ref().ok_or(SessionError::Closed)
    }

    fn cancel_eviction(&mut self) {
        if self.evict_at.take().is_some() {
            log::info!("Board {} reactivated, eviction cancelled", self.slug);
        }
    }

    /// Grace period over: persist and let go. Returns true once evicted.
    async fn evict(&mut self) -> bool {
        self.evict_at = None;
        let Some(board) = self.board.clone() else {
            return true;
        };
        match self.store.save_board(&self.slug, board).await {
            Ok(()) => {
                self.board = None;
                self.dirty = false;
                log::info!("Evicted board {}", self.slug);
                true
            }
            Err(e) => {
                // Keep the board resident and try again after another grace period.
                log::error!("Failed to persist board {} on eviction: {e}", self.slug);
                self.evict_at = Some(Instant::now() + self.config.eviction_grace);
                false
            }
        }
    }

    async fn save(&mut self, reason: &str) {
        let Some(board) = self.board.clone() else {
            return;
        };
        match self.store.save_board(&self.slug, board).await {
            Ok(()) => {
                self.dirty = false;
                log::debug!("Persisted board {} ({reason})", self.slug);
            }
            Err(e) => log::error!("Failed to persist board {} ({reason}): {e}", self.slug),
        }
    }

    async fn retire(&mut self, rx: &mut mpsc::Receiver<Command>) {
        if let Some(shared) = self.registry.upgrade() {
            shared.unregister(&self.slug, self.generation);
        }
        rx.close();
        while let Some(cmd) = rx.recv().await {
            cmd.bounce();
        }
        log::debug!("Session for {} retired (gen {})", self.slug, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBoardStore;
    use futures_util::future::{BoxFuture, FutureExt};
    use inkboard_core::Element;
    use tokio::sync::Notify;
    use tokio::time::sleep;

    fn seeded(slug: &str, elements: Vec<Element>) -> (MemoryBoardStore, BoardSessions) {
        let store = MemoryBoardStore::new();
        store.insert(slug, Board::new(elements));
        let sessions = BoardSessions::with_store(store.clone(), SessionConfig::default());
        (store, sessions)
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryBoardStore::new();
        let sessions = BoardSessions::with_store(store.clone(), SessionConfig::default());

        assert_eq!(sessions.get("nope").await, Err(SessionError::NotFound("nope".into())));
        assert_eq!(
            sessions.update("nope", BoardDeltaUpdate::empty()).await,
            Err(SessionError::NotFound("nope".into()))
        );
        assert_eq!(sessions.state("nope").await, SessionState::Unloaded);
        tokio::task::yield_now().await;
        assert_eq!(sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn test_get_loads_once() {
        let (store, sessions) = seeded("s1", vec![Element::new("a", 1)]);

        let first = sessions.get("s1").await.unwrap();
        let second = sessions.get("s1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.load_count(), 1);
        assert_eq!(sessions.state("s1").await, SessionState::Loaded);
    }

    #[tokio::test]
    async fn test_update_merges_and_publishes() {
        let (store, sessions) = seeded("s1", vec![Element::new("1", 1)]);
        let mut rx = sessions.subscribe("s1").await;

        let delta = BoardDeltaUpdate::new(
            vec![Element::new("1", 2), Element::new("2", 1)],
            Some(vec!["2".into(), "1".into()]),
            "c1",
        );
        sessions.update("s1", delta.clone()).await.unwrap();
        assert_eq!(store.load_count(), 1);

        let board = sessions.get("s1").await.unwrap();
        let ids: Vec<String> = board.elements.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_eq!(board.elements[1].version, 2);

        let published = rx.recv().await.unwrap();
        assert_eq!(*published, BoardUpdateResponse::delta(delta));
    }

    #[tokio::test]
    async fn test_server_side_merge_keeps_newer() {
        let (_store, sessions) = seeded("s1", vec![Element::new("a", 5).with_field("fill", "red")]);
        let stale = BoardDeltaUpdate::new(vec![Element::new("a", 5).with_field("fill", "blue")], None, "c1");
        sessions.update("s1", stale).await.unwrap();

        let board = sessions.get("s1").await.unwrap();
        assert_eq!(board.elements[0].fields["fill"], "red");
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_reconnect() {
        let (store, sessions) = seeded("s1", vec![Element::new("a", 1)]);
        sessions.get("s1").await.unwrap();

        // t=0: last collaborator leaves.
        sessions.complete("s1").await;
        assert_eq!(sessions.state("s1").await, SessionState::Draining);

        // t=10: someone rejoins. No storage round-trip.
        sleep(Duration::from_secs(10)).await;
        sessions.get("s1").await.unwrap();
        assert_eq!(store.load_count(), 1);
        assert_eq!(sessions.state("s1").await, SessionState::Loaded);

        // t=35: the original deadline has passed without firing.
        sleep(Duration::from_secs(25)).await;
        assert_eq!(sessions.state("s1").await, SessionState::Loaded);
        assert_eq!(store.save_count(), 0);
        assert_eq!(sessions.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_persists_and_unloads() {
        let (store, sessions) = seeded("s1", vec![Element::new("a", 1)]);
        sessions
            .update("s1", BoardDeltaUpdate::new(vec![Element::new("b", 1)], None, "c1"))
            .await
            .unwrap();

        sessions.complete("s1").await;
        sleep(Duration::from_secs(29)).await;
        assert_eq!(sessions.state("s1").await, SessionState::Draining);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(sessions.state("s1").await, SessionState::Unloaded);
        assert_eq!(sessions.session_count(), 0);
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.get("s1").unwrap().len(), 2);

        // Next access reloads from storage.
        let board = sessions.get("s1").await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(store.load_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_cancels_once() {
        let (store, sessions) = seeded("s1", vec![]);
        sessions.get("s1").await.unwrap();

        sessions.complete("s1").await;
        sessions.keep_alive("s1").await;
        sleep(Duration::from_secs(45)).await;
        assert_eq!(sessions.state("s1").await, SessionState::Loaded);

        // A later departure schedules a fresh eviction.
        sessions.complete("s1").await;
        sleep(Duration::from_secs(31)).await;
        assert_eq!(sessions.state("s1").await, SessionState::Unloaded);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_complete_keeps_first_deadline() {
        let (_store, sessions) = seeded("s1", vec![]);
        sessions.get("s1").await.unwrap();

        sessions.complete("s1").await;
        sleep(Duration::from_secs(20)).await;
        sessions.complete("s1").await;
        sleep(Duration::from_secs(11)).await;
        assert_eq!(sessions.state("s1").await, SessionState::Unloaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_only_when_dirty() {
        let (store, sessions) = seeded("s1", vec![]);
        sessions.get("s1").await.unwrap();

        sleep(Duration::from_secs(61)).await;
        assert_eq!(store.save_count(), 0);

        sessions
            .update("s1", BoardDeltaUpdate::new(vec![Element::new("a", 1)], None, "c1"))
            .await
            .unwrap();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.get("s1").unwrap().len(), 1);
        assert_eq!(sessions.state("s1").await, SessionState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_retried_next_tick() {
        let (store, sessions) = seeded("s1", vec![]);
        sessions
            .update("s1", BoardDeltaUpdate::new(vec![Element::new("a", 1)], None, "c1"))
            .await
            .unwrap();

        store.set_fail_saves(true);
        sleep(Duration::from_secs(61)).await;
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.get("s1").unwrap().len(), 0);
        assert_eq!(sessions.state("s1").await, SessionState::Loaded);

        store.set_fail_saves(false);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.get("s1").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_eviction_keeps_board() {
        let (store, sessions) = seeded("s1", vec![]);
        sessions.get("s1").await.unwrap();
        store.set_fail_saves(true);

        sessions.complete("s1").await;
        sleep(Duration::from_secs(31)).await;
        assert_eq!(sessions.state("s1").await, SessionState::Draining);

        store.set_fail_saves(false);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(sessions.state("s1").await, SessionState::Unloaded);
    }

    #[tokio::test]
    async fn test_explicit_flush_and_shutdown() {
        let (store, sessions) = seeded("s1", vec![]);
        assert_eq!(sessions.flush("s1").await, Ok(()));
        assert_eq!(store.save_count(), 0);

        sessions
            .update("s1", BoardDeltaUpdate::new(vec![Element::new("a", 1)], None, "c1"))
            .await
            .unwrap();
        sessions.flush("s1").await.unwrap();
        assert_eq!(store.save_count(), 1);

        sessions
            .update("s1", BoardDeltaUpdate::new(vec![Element::new("b", 1)], None, "c1"))
            .await
            .unwrap();
        sessions.shutdown().await;
        assert_eq!(store.get("s1").unwrap().len(), 2);
        tokio::task::yield_now().await;
        assert_eq!(sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryBoardStore::new();
        let sessions = BoardSessions::with_store(store, SessionConfig::default());

        sessions.create("fresh", Board::default()).await.unwrap();
        assert_eq!(
            sessions.create("fresh", Board::default()).await,
            Err(SessionError::AlreadyExists("fresh".into()))
        );
        assert!(sessions.get("fresh").await.unwrap().is_empty());
    }

    /// Store whose loads of "slow" block until released.
    #[derive(Clone)]
    struct GatedStore {
        inner: MemoryBoardStore,
        gate: Arc<Notify>,
    }

    impl BoardStore for GatedStore {
        fn load_board(&self, slug: &str) -> BoxFuture<'static, Result<Board, StoreError>> {
            let load = self.inner.load_board(slug);
            if slug == "slow" {
                let gate = self.gate.clone();
                async move {
                    gate.notified().await;
                    load.await
                }
                .boxed()
            } else {
                load
            }
        }

        fn save_board(&self, slug: &str, board: Board) -> BoxFuture<'static, Result<(), StoreError>> {
            self.inner.save_board(slug, board)
        }

        fn create_board(&self, slug: &str, board: Board) -> BoxFuture<'static, Result<(), StoreError>> {
            self.inner.create_board(slug, board)
        }
    }

    #[tokio::test]
    async fn test_slow_slug_does_not_block_others() {
        let inner = MemoryBoardStore::new();
        inner.insert("slow", Board::default());
        inner.insert("fast", Board::new(vec![Element::new("a", 1)]));
        let gate = Arc::new(Notify::new());
        let sessions = BoardSessions::with_store(
            GatedStore {
                inner,
                gate: gate.clone(),
            },
            SessionConfig::default(),
        );

        let slow = {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.get("slow").await })
        };
        tokio::task::yield_now().await;

        let fast = tokio::time::timeout(Duration::from_secs(1), sessions.get("fast")).await;
        assert_eq!(fast.unwrap().unwrap().len(), 1);
        assert!(!slow.is_finished());

        gate.notify_one();
        assert!(slow.await.unwrap().is_ok());
    }
}
