//! Reconstructs per-scope trust for the active branch from persisted
//! session entries.
//!
//! Replay starts at the compaction barrier: the entry immediately after
//! the latest compaction on the branch path, or the root when the path has
//! none. Within the window, anchor modes (`full`, `baseline_fallback`) may
//! bootstrap trust; derived modes (`unchanged`, `diff`, `unchanged_range`)
//! only advance trust when their base-chain guard holds. A window with no
//! anchor for a slot therefore yields no trust for that slot, which is what
//! makes the first post-compaction read for any scope a baseline read.

use std::collections::HashMap;
use std::collections::HashSet;

use readcache_protocol::Invalidation;
use readcache_protocol::ReadMeta;
use readcache_protocol::ReadMode;
use readcache_protocol::ScopeKey;
use readcache_protocol::SessionEntry;
use uuid::Uuid;

use crate::knowledge::KnowledgeMap;
use crate::knowledge::ScopeTrust;

/// Ranges that were explicitly refreshed and have not been re-anchored.
/// While a range is listed here, no base candidate is offered for it, so a
/// later full-scope anchor cannot silently re-enable range trust.
pub type BlockedRanges = HashMap<String, HashSet<ScopeKey>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayOutcome {
    pub knowledge: KnowledgeMap,
    pub blocked_ranges: BlockedRanges,
    /// Entries between the barrier and the leaf, of any kind.
    pub window_entries: usize,
    /// Valid read records replayed; equals the final sequence number.
    pub read_records: usize,
    pub mode_counts: HashMap<ReadMode, u64>,
}

/// Replay `entries` (the ordered root-to-leaf branch path) from the
/// compaction barrier.
pub fn replay_branch(entries: &[SessionEntry]) -> ReplayOutcome {
    let start = entries
        .iter()
        .rposition(SessionEntry::is_compaction)
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let window = &entries[start.min(entries.len())..];

    let mut outcome = ReplayOutcome {
        window_entries: window.len(),
        ..Default::default()
    };
    let mut seq: u64 = 0;
    for entry in window {
        if let Some(meta) = entry.read_meta() {
            // Every valid read record consumes a sequence number, whether
            // or not its transition fires.
            seq += 1;
            *outcome.mode_counts.entry(meta.mode).or_insert(0) += 1;
            apply_read_meta(&mut outcome, &meta, seq);
        } else if let Some(invalidation) = entry.invalidation_record() {
            apply_invalidation(&mut outcome, &invalidation);
        }
    }
    outcome.read_records = seq as usize;
    outcome
}

fn apply_read_meta(outcome: &mut ReplayOutcome, meta: &ReadMeta, seq: u64) {
    let path = meta.path_key.as_str();
    let scope = meta.scope_key;
    let knowledge = &mut outcome.knowledge;
    match (meta.mode, scope) {
        // Anchors bootstrap trust unconditionally, and a range anchor lifts
        // the refresh block for exactly that range.
        (ReadMode::Full | ReadMode::BaselineFallback, _) => {
            knowledge.record(path, scope, meta.served_hash.clone(), seq);
            if !scope.is_full()
                && let Some(blocked) = outcome.blocked_ranges.get_mut(path)
            {
                blocked.remove(&scope);
                if blocked.is_empty() {
                    outcome.blocked_ranges.remove(path);
                }
            }
        }
        (ReadMode::Unchanged, ScopeKey::Full) => {
            let Some(base) = &meta.base_hash else { return };
            let base_matches = knowledge
                .trust(path, &ScopeKey::Full)
                .is_some_and(|trust| &trust.hash == base);
            if base_matches && &meta.served_hash == base {
                knowledge.record(path, ScopeKey::Full, meta.served_hash.clone(), seq);
            }
        }
        (ReadMode::Diff, ScopeKey::Full) => {
            let Some(base) = &meta.base_hash else { return };
            let base_matches = knowledge
                .trust(path, &ScopeKey::Full)
                .is_some_and(|trust| &trust.hash == base);
            if base_matches {
                knowledge.record(path, ScopeKey::Full, meta.served_hash.clone(), seq);
            }
        }
        (ReadMode::UnchangedRange, scope @ ScopeKey::Range { .. }) => {
            let Some(base) = &meta.base_hash else { return };
            let exact = knowledge
                .trust(path, &scope)
                .is_some_and(|trust| &trust.hash == base);
            let full = knowledge
                .trust(path, &ScopeKey::Full)
                .is_some_and(|trust| &trust.hash == base);
            if exact || full {
                knowledge.record(path, scope, meta.served_hash.clone(), seq);
            }
        }
        // A derived mode on a scope it cannot apply to is ignored.
        _ => {}
    }
}

fn apply_invalidation(outcome: &mut ReplayOutcome, invalidation: &Invalidation) {
    outcome
        .knowledge
        .invalidate(&invalidation.path_key, &invalidation.scope_key);
    if let ScopeKey::Range { .. } = invalidation.scope_key {
        outcome
            .blocked_ranges
            .entry(invalidation.path_key.clone())
            .or_default()
            .insert(invalidation.scope_key);
    }
}

/// Pick the base candidate for a request, or `None` when the decision must
/// anchor.
pub fn select_base(
    knowledge: &KnowledgeMap,
    blocked_ranges: &BlockedRanges,
    path_key: &str,
    scope: &ScopeKey,
) -> Option<ScopeTrust> {
    match scope {
        ScopeKey::Full => knowledge.trust(path_key, scope).cloned(),
        ScopeKey::Range { .. } => {
            if blocked_ranges
                .get(path_key)
                .is_some_and(|set| set.contains(scope))
            {
                return None;
            }
            let exact = knowledge.trust(path_key, scope);
            let full = knowledge.trust(path_key, &ScopeKey::Full);
            match (exact, full) {
                (None, None) => None,
                (Some(trust), None) | (None, Some(trust)) => Some(trust.clone()),
                // Fresher wins; the exact slot breaks ties.
                (Some(exact), Some(full)) => {
                    if full.seq > exact.seq {
                        Some(full.clone())
                    } else {
                        Some(exact.clone())
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BoundaryKey {
    Root,
    Compaction(Uuid),
}

/// Memoized replay results, keyed by `(session, leaf, boundary)`. Results
/// are deep-cloned on hand-off so callers can never mutate shared state.
#[derive(Debug, Default)]
pub struct ReplayCache {
    cached: HashMap<(Uuid, Uuid, BoundaryKey), ReplayOutcome>,
}

impl ReplayCache {
    pub fn replay(&mut self, session_id: Uuid, leaf_id: Uuid, entries: &[SessionEntry]) -> ReplayOutcome {
        let boundary = entries
            .iter()
            .rev()
            .find(|entry| entry.is_compaction())
            .map(|entry| BoundaryKey::Compaction(entry.id))
            .unwrap_or(BoundaryKey::Root);
        let key = (session_id, leaf_id, boundary);
        if let Some(hit) = self.cached.get(&key) {
            return hit.clone();
        }
        let outcome = replay_branch(entries);
        self.cached.insert(key, outcome.clone());
        outcome
    }

    pub fn clear(&mut self) {
        self.cached.clear();
    }

    pub fn len(&self) -> usize {
        self.cached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.is_empty()
    }
}
