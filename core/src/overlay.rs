//! Same-turn trust that has not yet been persisted to the session stream.
//!
//! A decision's result record only reaches the session once the host
//! flushes the turn, so consecutive reads within a turn would otherwise not
//! see each other. The overlay bridges that gap: it is keyed by
//! `(session, leaf)`, uses sequence numbers from the reserved high band so
//! it always outranks replay-derived trust, and is discarded wholesale the
//! moment the leaf moves or any lifecycle event fires.

use std::collections::HashMap;

use readcache_protocol::ScopeKey;
use uuid::Uuid;

use crate::knowledge::KnowledgeMap;
use crate::knowledge::OVERLAY_SEQ_BASE;

#[derive(Debug)]
struct OverlayState {
    knowledge: KnowledgeMap,
    next_seq: u64,
}

impl Default for OverlayState {
    fn default() -> Self {
        Self {
            knowledge: KnowledgeMap::new(),
            next_seq: OVERLAY_SEQ_BASE,
        }
    }
}

#[derive(Debug, Default)]
pub struct OverlayStore {
    states: HashMap<(Uuid, Uuid), OverlayState>,
}

impl OverlayStore {
    /// Drop overlays recorded for any other leaf of `session_id`. Called on
    /// every request, so a leaf change (navigation, or the old leaf
    /// sprouting children) invalidates stale same-turn state.
    pub fn activate(&mut self, session_id: Uuid, leaf_id: Uuid) {
        self.states
            .retain(|(session, leaf), _| *session != session_id || *leaf == leaf_id);
    }

    /// Record trust established by a live decision; returns the sequence
    /// number assigned to it.
    pub fn record(
        &mut self,
        session_id: Uuid,
        leaf_id: Uuid,
        path_key: &str,
        scope: ScopeKey,
        hash: String,
    ) -> u64 {
        let state = self.states.entry((session_id, leaf_id)).or_default();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.knowledge.record(path_key, scope, hash, seq);
        seq
    }

    pub fn knowledge(&self, session_id: Uuid, leaf_id: Uuid) -> Option<&KnowledgeMap> {
        self.states
            .get(&(session_id, leaf_id))
            .map(|state| &state.knowledge)
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
