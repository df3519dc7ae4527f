//! # inkboard-core — board model and delta merge engine
//!
//! Everything here is pure and synchronous: the data shapes shared by the
//! server and its clients, the merge that folds a delta into a board, and
//! the client-side diff that produces deltas in the first place.
//!
//! ```text
//! local edits ──► diff::local_delta ──► BoardDeltaUpdate ──► network
//!                                                              │
//! Board ◄──────────── merge::apply_to_board(board, delta, …) ◄─┘
//! ```
//!
//! ## Modules
//!
//! - [`element`] — `Element`, `ElementId`, `Board`
//! - [`delta`] — `BoardDeltaUpdate`, `BoardUpdateResponse` (wire shapes)
//! - [`merge`] — last-writer-wins-by-version merge with explicit ordering
//! - [`diff`] — outgoing delta computation against a sent snapshot

pub mod element;
pub mod delta;
pub mod merge;
pub mod diff;

pub use element::{Board, Element, ElementId};
pub use delta::{BoardDeltaUpdate, BoardUpdateResponse};
pub use merge::{apply_to_board, incoming_wins};
pub use diff::{local_delta, rebase_scene, SentSnapshot};
