//! # inkboard-collab — Real-time board collaboration
//!
//! Serves boards to many concurrent editors over WebSocket and keeps every
//! client convergent with one authoritative copy per board.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄────────────────► │ SyncServer  │
//! │ (per user)  │     JSON frames    │ (central)   │
//! └──────┬──────┘                    └──────┬──────┘
//!        │                                  │
//!        ▼                                  ▼
//! ┌─────────────┐                    ┌─────────────┐      ┌─────────────────┐
//! │ Reconciler  │                    │  SyncHub    │ ───► │ PresenceTracker │
//! │ debounce /  │                    └──────┬──────┘      └─────────────────┘
//! │ throttle    │                           │
//! └─────────────┘                    ┌──────┴──────┐
//!                                    │BoardSessions│  one actor per slug
//!                                    └──────┬──────┘
//!                                           │
//!                                    ┌──────┴──────┐
//!                                    │ BoardStore  │  RocksDB / memory
//!                                    └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol
//! - [`broadcast`] — Per-slug fan-out topics
//! - [`presence`] — Who is on which board
//! - [`session`] — Board session cache (load, merge, flush, evict)
//! - [`hub`] — Presence and sessions behind one join/leave API
//! - [`server`] — WebSocket sync server
//! - [`client`] — WebSocket sync client
//! - [`reconcile`] — Client-side merge of server updates
//! - [`timing`] — Debounce and throttle deadlines
//! - [`storage`] — Persistent board stores
//! - [`config`] — Server and client configuration

pub mod broadcast;
pub mod client;
pub mod config;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod storage;
pub mod timing;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use hub::{JoinedBoard, SyncHub};
pub use presence::{Collaborator, PresenceChange, PresenceEvent, PresenceTracker};
pub use protocol::{ClientMessage, ErrorCode, ProtocolError, ServerMessage};
pub use reconcile::{Reconciled, Reconciler};
pub use server::{ServerStats, SyncServer};
pub use session::{BoardSessions, SessionConfig, SessionError, SessionState};
pub use storage::{BoardMetadata, BoardStore, MemoryBoardStore, RocksBoardStore, StoreConfig, StoreError};
pub use timing::{Debounce, Throttle};
