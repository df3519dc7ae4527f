//! In-process board store.
//!
//! Used for tests and for servers run without a storage path. Counts loads
//! and saves so callers can assert on storage round-trips, and can be told
//! to fail saves to exercise the flush retry path.

use futures_util::future::{self, BoxFuture, FutureExt};
use inkboard_core::Board;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{BoardStore, StoreError};

#[derive(Default)]
struct Inner {
    boards: Mutex<HashMap<String, Board>>,
    loads: AtomicU64,
    saves: AtomicU64,
    fail_saves: AtomicBool,
}

impl Inner {
    fn boards(&self) -> MutexGuard<'_, HashMap<String, Board>> {
        self.boards.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle; clones share the same boards.
#[derive(Clone, Default)]
pub struct MemoryBoardStore {
    inner: Arc<Inner>,
}

impl MemoryBoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a board directly, bypassing the counters.
    pub fn insert(&self, slug: impl Into<String>, board: Board) {
        self.inner.boards().insert(slug.into(), board);
    }

    /// Current persisted copy, bypassing the counters.
    pub fn get(&self, slug: &str) -> Option<Board> {
        self.inner.boards().get(slug).cloned()
    }

    pub fn load_count(&self) -> u64 {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> u64 {
        self.inner.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail until switched back.
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl BoardStore for MemoryBoardStore {
    fn load_board(&self, slug: &str) -> BoxFuture<'static, Result<Board, StoreError>> {
        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        let result = self
            .inner
            .boards()
            .get(slug)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(slug.to_string()));
        future::ready(result).boxed()
    }

    fn save_board(&self, slug: &str, board: Board) -> BoxFuture<'static, Result<(), StoreError>> {
        self.inner.saves.fetch_add(1, Ordering::SeqCst);
        let result = if self.inner.fail_saves.load(Ordering::SeqCst) {
            Err(StoreError::DatabaseError("save rejected".to_string()))
        } else {
            self.inner.boards().insert(slug.to_string(), board);
            Ok(())
        };
        future::ready(result).boxed()
    }

    fn create_board(&self, slug: &str, board: Board) -> BoxFuture<'static, Result<(), StoreError>> {
        let mut boards = self.inner.boards();
        let result = if boards.contains_key(slug) {
            Err(StoreError::AlreadyExists(slug.to_string()))
        } else {
            boards.insert(slug.to_string(), board);
            Ok(())
        };
        future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_core::Element;

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let store = MemoryBoardStore::new();
        assert_eq!(
            store.load_board("nope").await,
            Err(StoreError::NotFound("nope".into()))
        );
        assert_eq!(store.load_count(), 1);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = MemoryBoardStore::new();
        let board = Board::new(vec![Element::new("a", 1)]);
        store.save_board("s1", board.clone()).await.unwrap();
        assert_eq!(store.load_board("s1").await.unwrap(), board);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = MemoryBoardStore::new();
        store.create_board("s1", Board::default()).await.unwrap();
        assert_eq!(
            store.create_board("s1", Board::default()).await,
            Err(StoreError::AlreadyExists("s1".into()))
        );
    }

    #[tokio::test]
    async fn test_failing_saves_leave_previous_copy() {
        let store = MemoryBoardStore::new();
        store.insert("s1", Board::default());
        store.set_fail_saves(true);

        let board = Board::new(vec![Element::new("a", 1)]);
        assert!(store.save_board("s1", board).await.is_err());
        assert_eq!(store.get("s1"), Some(Board::default()));
    }
}
