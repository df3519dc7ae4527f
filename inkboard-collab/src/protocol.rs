//! JSON wire protocol between board clients and the sync server.
//!
//! Every frame is a WebSocket text message holding one tagged JSON object:
//! ```text
//! client → server   {"type":"join","slug":"s1","collaborator":{...}}
//!                   {"type":"delta","delta":{"excalidrawElements":[...],"order":[...],"senderId":"c1"}}
//!                   {"type":"pointer","x":10.0,"y":4.5}
//!                   {"type":"ping"}
//!
//! server → client   {"type":"board","update":{"type":"full","board":{"elements":[...]}}}
//!                   {"type":"board","update":{"type":"delta","delta":{...}}}
//!                   {"type":"presence","slug":"s1","collaborators":[...]}
//!                   {"type":"error","code":"not_found","message":"..."}
//!                   {"type":"pong"}
//! ```
//!
//! The first `board` frame after a successful join always carries a `full`
//! update.

use inkboard_core::{BoardDeltaUpdate, BoardUpdateResponse};
use serde::{Deserialize, Serialize};

use crate::presence::Collaborator;

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Enter a board. Must precede every other frame except `ping`.
    Join {
        slug: String,
        collaborator: Collaborator,
    },
    Delta {
        delta: BoardDeltaUpdate,
    },
    /// Pointer position on the joined board
    Pointer {
        x: f64,
        y: f64,
    },
    Ping,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Board {
        update: BoardUpdateResponse,
    },
    Presence {
        slug: String,
        collaborators: Vec<Collaborator>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The requested board does not exist
    NotFound,
    /// A board frame arrived before `join`
    NotJoined,
    InvalidMessage,
    /// Storage or session failure
    Internal,
}

impl ClientMessage {
    pub fn join(slug: impl Into<String>, collaborator: Collaborator) -> Self {
        Self::Join {
            slug: slug.into(),
            collaborator,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

impl ServerMessage {
    pub fn board(update: BoardUpdateResponse) -> Self {
        Self::Board { update }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// A well-formed frame that is not valid in the current state
    InvalidMessage(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessage(e) => write!(f, "Invalid message: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
