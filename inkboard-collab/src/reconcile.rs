//! Client-side reconciliation of server updates with local state.
//!
//! [`Reconciler`] is the synchronous core of a client session. It owns the
//! last-known board, the snapshot of what peers already know and the set of
//! elements other collaborators hold locked. Networking and timers live in
//! [`crate::client`].

use inkboard_core::{
    apply_to_board, local_delta, Board, BoardDeltaUpdate, BoardUpdateResponse, Element, ElementId,
    SentSnapshot,
};
use std::collections::HashSet;

use crate::protocol::ProtocolError;

/// What a server update did to local state.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// A full snapshot replaced local state.
    Replaced,
    /// A peer's delta was merged.
    Merged,
    /// Our own delta came back and was dropped.
    SelfEcho,
}

#[derive(Debug)]
pub struct Reconciler {
    client_id: String,
    board: Option<Board>,
    sent: SentSnapshot,
    locked: HashSet<ElementId>,
}

impl Reconciler {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            board: None,
            sent: SentSnapshot::new(),
            locked: HashSet::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Last-known board, `None` until the first full snapshot.
    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    pub fn is_synced(&self) -> bool {
        self.board.is_some()
    }

    /// Elements currently shown as locked.
    pub fn locked_ids(&self) -> &HashSet<ElementId> {
        &self.locked
    }

    /// Fold one server update into local state.
    ///
    /// A `full` update always wins over local state. A `delta` before any
    /// `full` is a protocol violation.
    pub fn handle_response(&mut self, response: BoardUpdateResponse) -> Result<Reconciled, ProtocolError> {
        match response {
            BoardUpdateResponse::Full { board } => {
                self.sent = SentSnapshot::from_board(&board);
                self.locked = board.locked_ids();
                log::debug!("{}: full snapshot with {} elements", self.client_id, board.len());
                self.board = Some(board);
                Ok(Reconciled::Replaced)
            }
            BoardUpdateResponse::Delta { delta } => {
                let Some(board) = &self.board else {
                    return Err(ProtocolError::InvalidMessage(
                        "delta received before full snapshot".to_string(),
                    ));
                };
                if delta.is_from(&self.client_id) {
                    log::trace!("{}: dropped own delta echo", self.client_id);
                    return Ok(Reconciled::SelfEcho);
                }

                let merged = apply_to_board(board, &delta, true);
                for el in &delta.elements {
                    if el.locked && !el.is_deleted {
                        self.locked.insert(el.id.clone());
                    } else {
                        self.locked.remove(&el.id);
                    }
                }
                self.sent.absorb(&delta, &merged);
                self.board = Some(merged);
                Ok(Reconciled::Merged)
            }
        }
    }

    /// Diff the current local scene against what peers know.
    ///
    /// On `Some`, the snapshot advances as if the delta was sent, so the
    /// caller must send it. Returns `None` before the first full snapshot or
    /// when nothing changed.
    pub fn local_change(&mut self, current: &[Element]) -> Option<BoardDeltaUpdate> {
        self.board.as_ref()?;
        let delta = local_delta(&self.sent, current, &self.client_id)?;
        self.sent.capture(current);
        self.board = Some(Board::new(current.iter().filter(|e| !e.is_deleted).cloned().collect()));
        Some(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_core::rebase_scene;

    fn synced(client: &str, elements: Vec<Element>) -> Reconciler {
        let mut r = Reconciler::new(client);
        r.handle_response(BoardUpdateResponse::full(Board::new(elements))).unwrap();
        r
    }

    fn ids(r: &Reconciler) -> Vec<String> {
        r.board().unwrap().elements.iter().map(|e| e.id.to_string()).collect()
    }

    #[test]
    fn test_delta_before_full_rejected() {
        let mut r = Reconciler::new("c1");
        let delta = BoardDeltaUpdate::new(vec![Element::new("a", 1)], None, "c2");
        assert!(r.handle_response(BoardUpdateResponse::delta(delta)).is_err());
        assert!(!r.is_synced());
    }

    #[test]
    fn test_full_snapshot_is_idempotent() {
        let full = BoardUpdateResponse::full(Board::new(vec![
            Element::new("a", 1).with_locked(true),
            Element::new("b", 3),
        ]));
        let mut r = Reconciler::new("c1");

        r.handle_response(full.clone()).unwrap();
        let first = (r.board().cloned(), r.locked_ids().clone());
        r.handle_response(full).unwrap();
        assert_eq!((r.board().cloned(), r.locked_ids().clone()), first);
    }

    #[test]
    fn test_full_snapshot_discards_local_edits() {
        let mut r = synced("c1", vec![Element::new("a", 1)]);
        r.local_change(&[Element::new("a", 1), Element::new("mine", 1)]);

        r.handle_response(BoardUpdateResponse::full(Board::new(vec![Element::new("z", 9)])))
            .unwrap();
        assert_eq!(ids(&r), vec!["z"]);
    }

    #[test]
    fn test_self_echo_suppressed() {
        let mut r = synced("c1", vec![Element::new("a", 1)]);
        let sent = r
            .local_change(&[Element::new("a", 2).with_field("text", "mine")])
            .unwrap();
        assert_eq!(sent.sender_id, "c1");

        // The server relays it back, but an older copy of "a" would have
        // clobbered a newer local edit if reapplied.
        let mut echo = sent.clone();
        echo.elements[0] = Element::new("a", 2).with_field("text", "stale");
        assert_eq!(
            r.handle_response(BoardUpdateResponse::delta(echo)).unwrap(),
            Reconciled::SelfEcho
        );
        assert_eq!(r.board().unwrap().elements[0].fields["text"], "mine");
    }

    #[test]
    fn test_peer_delta_always_wins_on_client() {
        let mut r = synced("c1", vec![Element::new("a", 5).with_field("fill", "red")]);
        let delta = BoardDeltaUpdate::new(
            vec![Element::new("a", 2).with_field("fill", "blue")],
            None,
            "c2",
        );
        assert_eq!(
            r.handle_response(BoardUpdateResponse::delta(delta)).unwrap(),
            Reconciled::Merged
        );
        assert_eq!(r.board().unwrap().elements[0].fields["fill"], "blue");
    }

    #[test]
    fn test_lock_indicators_follow_delta() {
        let mut r = synced("c1", vec![Element::new("a", 1), Element::new("b", 1)]);

        let lock = BoardDeltaUpdate::new(vec![Element::new("a", 2).with_locked(true)], None, "c2");
        r.handle_response(BoardUpdateResponse::delta(lock)).unwrap();
        assert!(r.locked_ids().contains(&ElementId::from("a")));

        let unlock = BoardDeltaUpdate::new(vec![Element::new("a", 3)], None, "c2");
        r.handle_response(BoardUpdateResponse::delta(unlock)).unwrap();
        assert!(r.locked_ids().is_empty());

        let gone = BoardDeltaUpdate::new(
            vec![Element::new("b", 1).with_locked(true).tombstone()],
            None,
            "c2",
        );
        r.handle_response(BoardUpdateResponse::delta(gone)).unwrap();
        assert!(r.locked_ids().is_empty());
        assert_eq!(ids(&r), vec!["a"]);
    }

    #[test]
    fn test_local_change_tracks_snapshot() {
        let mut r = synced("c1", vec![Element::new("a", 1), Element::new("b", 1)]);

        let delta = r.local_change(&[Element::new("b", 1), Element::new("a", 2)]).unwrap();
        assert_eq!(delta.elements, vec![Element::new("a", 2)]);
        assert_eq!(delta.order, Some(vec![ElementId::from("b"), ElementId::from("a")]));

        // Same scene again: nothing to send.
        assert!(r.local_change(&[Element::new("b", 1), Element::new("a", 2)]).is_none());

        let delta = r.local_change(&[Element::new("a", 2)]).unwrap();
        assert_eq!(delta.elements.len(), 1);
        assert!(delta.elements[0].is_deleted);
        assert_eq!(delta.elements[0].id, ElementId::from("b"));
    }

    #[test]
    fn test_remote_changes_not_echoed() {
        let mut r = synced("c1", vec![Element::new("a", 1)]);
        let remote = BoardDeltaUpdate::new(
            vec![Element::new("r", 1)],
            Some(vec!["a".into(), "r".into()]),
            "c2",
        );
        r.handle_response(BoardUpdateResponse::delta(remote)).unwrap();

        let scene = r.board().unwrap().elements.clone();
        assert!(r.local_change(&scene).is_none());
    }

    #[test]
    fn test_peer_creation_survives_buffered_edit() {
        let mut r = synced("c1", vec![Element::new("a", 1)]);
        let buffered = vec![Element::new("a", 2)];

        let remote = BoardDeltaUpdate::new(
            vec![Element::new("r", 1)],
            Some(vec!["a".into(), "r".into()]),
            "c2",
        );
        r.handle_response(BoardUpdateResponse::delta(remote.clone())).unwrap();

        let scene = rebase_scene(buffered, &remote);
        let delta = r.local_change(&scene).unwrap();
        assert_eq!(delta.elements, vec![Element::new("a", 2)]);
        assert!(delta.elements.iter().all(|e| !e.is_deleted));
        assert_eq!(delta.order, Some(vec![ElementId::from("a"), ElementId::from("r")]));
        assert_eq!(ids(&r), vec!["a", "r"]);
    }

    #[test]
    fn test_no_local_delta_before_sync() {
        let mut r = Reconciler::new("c1");
        assert!(r.local_change(&[Element::new("a", 1)]).is_none());
    }
}
