//! Wire shapes exchanged between clients and the board session.
//!
//! ```text
//! BoardDeltaUpdate  { excalidrawElements: Element[], order?: Id[], senderId }
//! BoardUpdateResponse
//!   = { type: "full",  board: { elements: Element[] } }   once, on join
//!   | { type: "delta", delta: BoardDeltaUpdate }          every change after
//! ```

use serde::{Deserialize, Serialize};

use crate::element::{Board, Element, ElementId};

/// Incremental change set produced by one client.
///
/// `elements` holds only what changed since the sender's previous send,
/// tombstones included. `order` is the sender's full live ordering at send
/// time, or `None` when ordering did not change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardDeltaUpdate {
    #[serde(rename = "excalidrawElements", default)]
    pub elements: Vec<Element>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<ElementId>>,
    #[serde(default)]
    pub sender_id: String,
}

impl BoardDeltaUpdate {
    pub fn new(elements: Vec<Element>, order: Option<Vec<ElementId>>, sender_id: impl Into<String>) -> Self {
        Self {
            elements,
            order,
            sender_id: sender_id.into(),
        }
    }

    /// The idle value of a buffered-delta slot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when applying this delta cannot change any board.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.order.is_none()
    }

    pub fn is_from(&self, client_id: &str) -> bool {
        !self.sender_id.is_empty() && self.sender_id == client_id
    }
}

/// What a subscriber receives on a board's update channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BoardUpdateResponse {
    Full { board: Board },
    Delta { delta: BoardDeltaUpdate },
}

impl BoardUpdateResponse {
    pub fn full(board: Board) -> Self {
        Self::Full { board }
    }

    pub fn delta(delta: BoardDeltaUpdate) -> Self {
        Self::Delta { delta }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}
