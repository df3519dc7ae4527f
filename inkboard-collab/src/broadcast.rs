//! Per-slug publish/subscribe fan-out.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each subscriber gets an independent receiver that buffers up to
//! `capacity` messages; a subscriber that falls further behind observes
//! `RecvError::Lagged` and is expected to resynchronise.
//!
//! Delivery is ordered per subscription. Nothing is filtered here:
//! a publisher receives its own messages if it is subscribed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_unheard: u64,
    pub subscribers: usize,
}

/// Lock-free counters updated on the publish path.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_unheard: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_unheard: AtomicU64::new(0),
        }
    }
}

/// A broadcast group for a single slug.
pub struct BroadcastGroup<T> {
    sender: broadcast::Sender<T>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl<T: Clone + Send + 'static> BroadcastGroup<T> {
    /// Create a new group buffering up to `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            atomic_stats: AtomicBroadcastStats::new(),
        }
    }

    /// Publish to every current subscriber.
    ///
    /// Returns the number of receivers the message was queued for.
    pub fn publish(&self, msg: T) -> usize {
        let count = self.sender.send(msg).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        if count == 0 {
            self.atomic_stats.messages_unheard.fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Live receivers. Dropping a receiver unsubscribes it.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_unheard: self.atomic_stats.messages_unheard.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Maps slugs to broadcast groups so topics stay isolated per board.
pub struct RoomManager<T> {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup<T>>>>,
    default_capacity: usize,
}

impl<T: Clone + Send + 'static> RoomManager<T> {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for `slug`.
    pub async fn get_or_create(&self, slug: &str) -> Arc<BroadcastGroup<T>> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(slug) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(slug) {
            return room.clone();
        }

        let room = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(slug.to_string(), room.clone());
        room
    }

    pub async fn get(&self, slug: &str) -> Option<Arc<BroadcastGroup<T>>> {
        self.rooms.read().await.get(slug).cloned()
    }

    /// Subscribe to `slug`, creating the topic if needed.
    ///
    /// The receiver is taken under the map lock so a concurrent
    /// `remove_if_empty` cannot orphan it.
    pub async fn subscribe(&self, slug: &str) -> broadcast::Receiver<T> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(slug) {
                return room.subscribe();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(slug.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .subscribe()
    }

    /// Publish to `slug`. A topic nobody ever subscribed to is not created.
    pub async fn publish(&self, slug: &str, msg: T) -> usize {
        match self.get(slug).await {
            Some(room) => room.publish(msg),
            None => 0,
        }
    }

    /// Drop the topic once its last receiver is gone.
    pub async fn remove_if_empty(&self, slug: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(slug) {
            if room.subscriber_count() == 0 {
                rooms.remove(slug);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_slugs(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
