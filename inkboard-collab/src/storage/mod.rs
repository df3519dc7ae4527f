//! Persistent storage for boards.
//!
//! ```text
//! ┌──────────────┐  load / save   ┌───────────────────┐
//! │ BoardSession │ ─────────────► │ dyn BoardStore    │
//! │ (per slug)   │                ├───────────────────┤
//! └──────────────┘                │ MemoryBoardStore  │  tests, ephemeral
//!                                 │ RocksBoardStore   │  CF "boards"   (LZ4 JSON)
//!                                 │                   │  CF "metadata" (bincode)
//!                                 └───────────────────┘
//! ```
//!
//! The store is an external collaborator to the session cache: saves either
//! fully succeed or report an error, and the cache retries on its next
//! flush. Futures are `'static` so sessions can await them without
//! borrowing the store.

pub mod memory;
pub mod rocks;

pub use memory::MemoryBoardStore;
pub use rocks::{BoardMetadata, RocksBoardStore, StoreConfig};

use futures_util::future::BoxFuture;
use inkboard_core::Board;

/// Storage errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No board persisted under this slug
    NotFound(String),
    /// `create_board` on a slug that already has a board
    AlreadyExists(String),
    /// Backend failure
    DatabaseError(String),
    SerializationError(String),
    DeserializationError(String),
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(slug) => write!(f, "Board not found: {slug}"),
            StoreError::AlreadyExists(slug) => write!(f, "Board already exists: {slug}"),
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Durable home of boards between sessions.
pub trait BoardStore: Send + Sync + 'static {
    /// Load the persisted board, or `StoreError::NotFound`.
    fn load_board(&self, slug: &str) -> BoxFuture<'static, Result<Board, StoreError>>;

    /// Overwrite the persisted board.
    fn save_board(&self, slug: &str, board: Board) -> BoxFuture<'static, Result<(), StoreError>>;

    /// Persist a new board, or `StoreError::AlreadyExists`.
    fn create_board(&self, slug: &str, board: Board) -> BoxFuture<'static, Result<(), StoreError>>;
}
