//! Delta merge engine.
//!
//! Folds a [`BoardDeltaUpdate`] into a [`Board`] and returns a new board.
//! Pure and deterministic; the input board is never touched.
//!
//! ```text
//! delta.elements ──┬── isDeleted ───────────────► deleted  (drop from board)
//!                  └── live ──┬── id on board ──► updated  (write-wins rule)
//!                             └── new id ───────► added    (append / order)
//! ```
//!
//! Write-wins rule: on a client the incoming element always replaces the
//! local one. On the server it replaces the existing element only when its
//! version is strictly greater. Equal versions keep the existing element;
//! two concurrent edits that land on the same version collide and the first
//! one to reach the session wins. There is no tie-break beyond that.

use std::collections::{HashMap, HashSet};

use crate::delta::BoardDeltaUpdate;
use crate::element::{Board, Element, ElementId};

/// Whether `incoming` replaces `existing`.
#[inline]
pub fn incoming_wins(existing: &Element, incoming: &Element, is_on_client: bool) -> bool {
    is_on_client || incoming.version > existing.version
}

/// Apply `delta` to `board`.
///
/// A tombstone anywhere in the batch removes its id from the result, even if
/// the same id also shows up live in the batch or in `order`. Ids in `order`
/// that resolve to nothing are skipped.
pub fn apply_to_board(board: &Board, delta: &BoardDeltaUpdate, is_on_client: bool) -> Board {
    let deleted: HashSet<&ElementId> = delta
        .elements
        .iter()
        .filter(|e| e.is_deleted)
        .map(|e| &e.id)
        .collect();

    let existing: HashSet<&ElementId> = board.elements.iter().map(|e| &e.id).collect();

    let mut updated: HashMap<&ElementId, &Element> = HashMap::new();
    let mut added: Vec<&Element> = Vec::new();
    let mut added_slot: HashMap<&ElementId, usize> = HashMap::new();

    for el in delta.elements.iter().filter(|e| !e.is_deleted && !deleted.contains(&e.id)) {
        if existing.contains(&el.id) {
            updated.insert(&el.id, el);
        } else if let Some(&slot) = added_slot.get(&el.id) {
            // Same new id twice in one batch: last copy, first position.
            added[slot] = el;
        } else {
            added_slot.insert(&el.id, added.len());
            added.push(el);
        }
    }

    let mut merged: Vec<Element> = Vec::with_capacity(board.elements.len() + added.len());
    for current in &board.elements {
        if deleted.contains(&current.id) {
            continue;
        }
        match updated.get(&current.id) {
            Some(incoming) if incoming_wins(current, incoming, is_on_client) => {
                merged.push((*incoming).clone());
            }
            Some(incoming) => {
                log::trace!(
                    "keeping element {} v{} over incoming v{}",
                    current.id,
                    current.version,
                    incoming.version
                );
                merged.push(current.clone());
            }
            None => merged.push(current.clone()),
        }
    }

    let elements = match &delta.order {
        Some(order) => resequence(merged, &added, order),
        None => {
            merged.extend(added.into_iter().cloned());
            merged
        }
    };

    Board { elements }
}

/// Rebuild the element list following `order`.
///
/// Each id is resolved against the newly added elements first, then against
/// the merged survivors. An id is emitted at most once.
fn resequence(merged: Vec<Element>, added: &[&Element], order: &[ElementId]) -> Vec<Element> {
    let mut added_by_id: HashMap<&ElementId, &Element> =
        added.iter().map(|e| (&e.id, *e)).collect();
    let mut merged_by_id: HashMap<ElementId, Element> =
        merged.into_iter().map(|e| (e.id.clone(), e)).collect();

    let mut out = Vec::with_capacity(order.len());
    for id in order {
        if let Some(el) = added_by_id.remove(id) {
            out.push(el.clone());
        } else if let Some(el) = merged_by_id.remove(id) {
            out.push(el);
        } else {
            // Usually a concurrent delete racing the sender's ordering.
            log::debug!("order references unknown element {id}, skipping");
        }
    }

    if !merged_by_id.is_empty() || !added_by_id.is_empty() {
        log::debug!(
            "order omitted {} element(s); dropped from merged board",
            merged_by_id.len() + added_by_id.len()
        );
    }

    out
}
