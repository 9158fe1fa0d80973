//! Per-scope trust reconstructed from the active branch.
//!
//! A [`KnowledgeMap`] records, for every `(path, scope)` the branch has
//! established trust for, the content hash the model last observed and the
//! sequence number that established it. Full-file trust and range trusts
//! for the same path are independent slots.

use std::collections::HashMap;

use readcache_protocol::ScopeKey;

/// Overlay sequence numbers live in a disjoint high band so a same-turn
/// decision always outranks anything replay derives for the same slot.
/// Replay sequences start at 1 and never get anywhere near this.
pub const OVERLAY_SEQ_BASE: u64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeTrust {
    /// Digest of the content body that established this trust.
    pub hash: String,
    /// Arbitrates freshness between candidate bases.
    pub seq: u64,
}

/// `path_key -> scope_key -> trust`. Inner maps are never empty: erasing a
/// path's last scope removes the path itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeMap {
    paths: HashMap<String, HashMap<ScopeKey, ScopeTrust>>,
}

impl KnowledgeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn tracked_paths(&self) -> usize {
        self.paths.len()
    }

    pub fn tracked_scopes(&self) -> usize {
        self.paths.values().map(HashMap::len).sum()
    }

    pub fn trust(&self, path_key: &str, scope: &ScopeKey) -> Option<&ScopeTrust> {
        self.paths.get(path_key)?.get(scope)
    }

    /// Establish or advance trust for a slot.
    pub fn record(&mut self, path_key: &str, scope: ScopeKey, hash: String, seq: u64) {
        self.paths
            .entry(path_key.to_string())
            .or_default()
            .insert(scope, ScopeTrust { hash, seq });
    }

    /// Apply an invalidation: the full scope erases the path wholesale, a
    /// range scope erases only its own slot.
    pub fn invalidate(&mut self, path_key: &str, scope: &ScopeKey) {
        match scope {
            ScopeKey::Full => {
                self.paths.remove(path_key);
            }
            ScopeKey::Range { .. } => {
                if let Some(scopes) = self.paths.get_mut(path_key) {
                    scopes.remove(scope);
                    if scopes.is_empty() {
                        self.paths.remove(path_key);
                    }
                }
            }
        }
    }

    /// Merge `other` on top of `self`; for a shared slot the higher
    /// sequence wins.
    pub fn merge_from(&mut self, other: &KnowledgeMap) {
        for (path_key, scopes) in &other.paths {
            for (scope, trust) in scopes {
                match self.trust(path_key, scope) {
                    Some(existing) if existing.seq >= trust.seq => {}
                    _ => self.record(path_key, *scope, trust.hash.clone(), trust.seq),
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HashMap<ScopeKey, ScopeTrust>)> {
        self.paths.iter()
    }
}
