//! Joins presence and board sessions into one per-connection API.
//!
//! The hub owns the rule that ties the two together: when a board's
//! collaborator count drops to zero the session starts its grace period,
//! and any join cancels it again.

use inkboard_core::{Board, BoardDeltaUpdate, BoardUpdateResponse};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::presence::{Collaborator, PresenceEvent, PresenceTracker};
use crate::session::{BoardSessions, SessionError};

/// What a collaborator gets back from a successful join.
pub struct JoinedBoard {
    /// Full board at join time
    pub board: Board,
    /// Board updates published after the subscription was taken
    pub updates: broadcast::Receiver<Arc<BoardUpdateResponse>>,
    pub presence: broadcast::Receiver<PresenceEvent>,
}

pub struct SyncHub {
    sessions: BoardSessions,
    presence: PresenceTracker,
    create_missing_boards: bool,
}

impl SyncHub {
    pub fn new(sessions: BoardSessions, create_missing_boards: bool) -> Self {
        let capacity = sessions.config().broadcast_capacity;
        Self {
            sessions,
            presence: PresenceTracker::new(capacity),
            create_missing_boards,
        }
    }

    pub fn sessions(&self) -> &BoardSessions {
        &self.sessions
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Register `collaborator` on `slug` and fetch the board.
    ///
    /// Subscriptions are taken before the board is read, so an update racing
    /// the join is delivered rather than lost. The collaborator is announced
    /// only once the board is loaded.
    pub async fn join(&self, slug: &str, collaborator: Collaborator) -> Result<JoinedBoard, SessionError> {
        let id = collaborator.id.clone();
        let updates = self.sessions.subscribe(slug).await;
        let presence = self.presence.subscribe(slug).await;

        match self.load(slug).await {
            Ok(board) => {
                self.presence.update(slug, collaborator).await;
                // A leave between the load and the update may have started
                // the grace period.
                self.sessions.keep_alive(slug).await;
                log::info!("Collaborator {id} joined {slug}");
                Ok(JoinedBoard {
                    board,
                    updates,
                    presence,
                })
            }
            Err(e) => {
                drop(updates);
                drop(presence);
                self.sessions.release_topic(slug).await;
                self.presence.release_topic(slug).await;
                log::info!("Collaborator {id} rejected from {slug}: {e}");
                Err(e)
            }
        }
    }

    async fn load(&self, slug: &str) -> Result<Board, SessionError> {
        match self.sessions.get(slug).await {
            Err(SessionError::NotFound(_)) if self.create_missing_boards => {
                match self.sessions.create(slug, Board::default()).await {
                    Ok(()) | Err(SessionError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
                self.sessions.get(slug).await
            }
            other => other,
        }
    }

    /// Merge a collaborator's delta into the authoritative board.
    pub async fn apply(&self, slug: &str, delta: BoardDeltaUpdate) -> Result<(), SessionError> {
        if delta.is_empty() {
            return Ok(());
        }
        self.sessions.update(slug, delta).await
    }

    pub async fn move_pointer(&self, slug: &str, collaborator_id: &str, x: f64, y: f64) -> bool {
        self.presence.move_pointer(slug, collaborator_id, x, y).await
    }

    /// Drop `collaborator_id` from `slug`.
    ///
    /// Call after the connection's receivers are dropped so the board topic
    /// can be released.
    pub async fn leave(&self, slug: &str, collaborator_id: &str) {
        let remaining = self.presence.remove(slug, collaborator_id).await;
        log::info!("Collaborator {collaborator_id} left {slug} ({remaining} remaining)");

        if remaining == 0 {
            self.sessions.complete(slug).await;
            // A join may have slipped in between the removal and `complete`.
            if self.presence.active_count(slug) > 0 {
                self.sessions.keep_alive(slug).await;
            }
        }
        self.sessions.release_topic(slug).await;
    }

    /// Persist every loaded board and stop all sessions.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}
