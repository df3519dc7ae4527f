//! Collaborator presence per board.
//!
//! Ephemeral, never persisted, safe to lose on restart. Holds no board
//! content: element locks travel inside the `locked` flag of elements in
//! ordinary deltas, not through here.
//!
//! ```text
//! join / pointer move ──► PresenceTracker::update ──┐
//! disconnect ───────────► PresenceTracker::remove ──┤
//!                                                   ▼
//!                          RoomManager<PresenceEvent> (per slug)
//!                                                   │
//!                                                   ▼
//!                       every subscribed connection: Collaborator[]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::broadcast::RoomManager;

/// One collaborator's presence on a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl Collaborator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar_url: None,
            x: 0.0,
            y: 0.0,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    Update(String),
    Remove(String),
}

/// Emitted on a slug's presence topic after every change.
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub slug: String,
    pub change: PresenceChange,
    /// Full collaborator list after the change.
    pub collaborators: Vec<Collaborator>,
}

/// Tracks who is on which board.
pub struct PresenceTracker {
    boards: Mutex<HashMap<String, Vec<Collaborator>>>,
    topics: RoomManager<PresenceEvent>,
}

impl PresenceTracker {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            boards: Mutex::new(HashMap::new()),
            topics: RoomManager::new(broadcast_capacity),
        }
    }

    fn boards(&self) -> MutexGuard<'_, HashMap<String, Vec<Collaborator>>> {
        // Presence is rebuilt by the next update; a poisoned map is still usable.
        self.boards.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Upsert `collaborator` by id on `slug`. Returns the new active count.
    pub async fn update(&self, slug: &str, collaborator: Collaborator) -> usize {
        let id = collaborator.id.clone();
        let snapshot = {
            let mut boards = self.boards();
            let list = boards.entry(slug.to_string()).or_default();
            match list.iter_mut().find(|c| c.id == collaborator.id) {
                Some(existing) => *existing = collaborator,
                None => list.push(collaborator),
            }
            list.clone()
        };

        let count = snapshot.len();
        self.emit(slug, PresenceChange::Update(id), snapshot).await;
        count
    }

    /// Move a known collaborator's pointer. Unknown ids are ignored.
    pub async fn move_pointer(&self, slug: &str, collaborator_id: &str, x: f64, y: f64) -> bool {
        let snapshot = {
            let mut boards = self.boards();
            let Some(list) = boards.get_mut(slug) else {
                return false;
            };
            let Some(c) = list.iter_mut().find(|c| c.id == collaborator_id) else {
                return false;
            };
            c.x = x;
            c.y = y;
            list.clone()
        };

        log::trace!("pointer {collaborator_id} on {slug} at ({x:.1}, {y:.1})");
        self.emit(slug, PresenceChange::Update(collaborator_id.to_string()), snapshot)
            .await;
        true
    }

    /// Remove a collaborator. Returns how many remain on `slug`.
    ///
    /// The slug entry is deleted outright when its list empties.
    pub async fn remove(&self, slug: &str, collaborator_id: &str) -> usize {
        let snapshot = {
            let mut boards = self.boards();
            let Some(list) = boards.get_mut(slug) else {
                return 0;
            };
            let before = list.len();
            list.retain(|c| c.id != collaborator_id);
            if list.len() == before {
                return list.len();
            }
            let snapshot = list.clone();
            if list.is_empty() {
                boards.remove(slug);
            }
            snapshot
        };

        let remaining = snapshot.len();
        self.emit(slug, PresenceChange::Remove(collaborator_id.to_string()), snapshot)
            .await;
        if remaining == 0 {
            self.topics.remove_if_empty(slug).await;
        }
        remaining
    }

    pub fn active_count(&self, slug: &str) -> usize {
        self.boards().get(slug).map_or(0, Vec::len)
    }

    pub fn collaborators(&self, slug: &str) -> Vec<Collaborator> {
        self.boards().get(slug).cloned().unwrap_or_default()
    }

    /// Slugs with at least one collaborator.
    pub fn active_slugs(&self) -> Vec<String> {
        self.boards().keys().cloned().collect()
    }

    pub async fn subscribe(&self, slug: &str) -> broadcast::Receiver<PresenceEvent> {
        self.topics.subscribe(slug).await
    }

    /// Drop `slug`'s topic if it has neither collaborators nor listeners.
    pub async fn release_topic(&self, slug: &str) -> bool {
        if self.active_count(slug) > 0 {
            return false;
        }
        self.topics.remove_if_empty(slug).await
    }

    /// Number of slugs with a live presence topic.
    pub async fn topic_count(&self) -> usize {
        self.topics.room_count().await
    }

    async fn emit(&self, slug: &str, change: PresenceChange, collaborators: Vec<Collaborator>) {
        let event = PresenceEvent {
            slug: slug.to_string(),
            change,
            collaborators,
        };
        self.topics.publish(slug, event).await;
    }
}
