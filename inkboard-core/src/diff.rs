//! Outgoing delta computation for a client.
//!
//! A client keeps a [`SentSnapshot`] of what its peers already know: the
//! elements it last sent plus everything it has absorbed from the server.
//! [`local_delta`] compares the current local scene with that snapshot.

use std::collections::{HashMap, HashSet};

use crate::delta::BoardDeltaUpdate;
use crate::element::{Board, Element, ElementId};

/// Last state known to be shared with the server.
#[derive(Debug, Clone, Default)]
pub struct SentSnapshot {
    elements: HashMap<ElementId, Element>,
    order: Vec<ElementId>,
}

impl SentSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a board as received from the server.
    pub fn from_board(board: &Board) -> Self {
        let mut snap = Self::new();
        snap.capture(&board.elements);
        snap
    }

    /// Replace the snapshot with the live part of `elements`.
    pub fn capture(&mut self, elements: &[Element]) {
        self.elements = elements
            .iter()
            .filter(|e| !e.is_deleted)
            .map(|e| (e.id.clone(), e.clone()))
            .collect();
        self.order = elements
            .iter()
            .filter(|e| !e.is_deleted)
            .map(|e| e.id.clone())
            .collect();
    }

    /// Fold a remote delta in so those elements are not echoed back.
    pub fn absorb(&mut self, delta: &BoardDeltaUpdate, merged: &Board) {
        for el in &delta.elements {
            if el.is_deleted {
                self.elements.remove(&el.id);
            } else if let Some(current) = merged.get(&el.id) {
                self.elements.insert(el.id.clone(), current.clone());
            }
        }
        self.order = merged.ids();
    }

    pub fn version_of(&self, id: &ElementId) -> Option<u64> {
        self.elements.get(id).map(|e| e.version)
    }

    pub fn order(&self) -> &[ElementId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Delta between `snapshot` and the current local scene.
///
/// - live elements whose version rose, or that are new, are sent as-is;
/// - elements in the snapshot that disappeared locally, or were flagged
///   deleted locally, are sent as tombstones;
/// - `order` is the full live ordering.
///
/// Returns `None` when nothing changed, ordering included.
pub fn local_delta(snapshot: &SentSnapshot, current: &[Element], sender_id: &str) -> Option<BoardDeltaUpdate> {
    let mut elements = Vec::new();
    let mut live: HashSet<&ElementId> = HashSet::new();

    for el in current {
        if el.is_deleted {
            if snapshot.version_of(&el.id).is_some() {
                elements.push(el.clone());
            }
            continue;
        }
        live.insert(&el.id);
        match snapshot.version_of(&el.id) {
            Some(sent) if el.version <= sent => {}
            _ => elements.push(el.clone()),
        }
    }

    let flagged: HashSet<&ElementId> = current.iter().filter(|e| e.is_deleted).map(|e| &e.id).collect();
    for id in snapshot.order() {
        if live.contains(id) || flagged.contains(id) {
            continue;
        }
        if let Some(gone) = snapshot.elements.get(id) {
            elements.push(gone.tombstone());
        }
    }

    let order: Vec<ElementId> = current
        .iter()
        .filter(|e| !e.is_deleted)
        .map(|e| e.id.clone())
        .collect();

    if elements.is_empty() && order.as_slice() == snapshot.order() {
        return None;
    }

    Some(BoardDeltaUpdate::new(elements, Some(order), sender_id))
}

/// Carry a peer's delta into a local scene that has not been sent yet.
///
/// Peer additions are appended and peer deletions removed, so diffing the
/// scene afterwards neither tombstones nor reorders away what the peer
/// did. A local element newer than the peer's copy is a pending edit and
/// is kept; otherwise the peer's copy wins. The peer's `order` is not
/// applied, since it cannot know about elements created locally.
pub fn rebase_scene(scene: Vec<Element>, delta: &BoardDeltaUpdate) -> Vec<Element> {
    let incoming: HashMap<&ElementId, &Element> = delta.elements.iter().map(|e| (&e.id, e)).collect();
    let mut seen: HashSet<&ElementId> = HashSet::new();

    let mut rebased: Vec<Element> = Vec::with_capacity(scene.len() + delta.elements.len());
    for local in scene {
        match incoming.get(&local.id) {
            Some(&peer) => {
                seen.insert(&peer.id);
                if peer.is_deleted {
                    continue;
                }
                if local.version > peer.version {
                    rebased.push(local);
                } else {
                    rebased.push(peer.clone());
                }
            }
            None => rebased.push(local),
        }
    }

    for peer in &delta.elements {
        if !peer.is_deleted && !seen.contains(&peer.id) {
            seen.insert(&peer.id);
            rebased.push(peer.clone());
        }
    }
    rebased
}
