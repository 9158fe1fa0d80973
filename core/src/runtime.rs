//! Shared runtime state: the object store handle, the memoized replay
//! cache, the same-turn overlay, and per-process decision stats.
//!
//! The mutex guards brief in-memory map operations only; nothing holds it
//! across an await point. Lifecycle notifications from the host clear the
//! memo and overlay wholesale and never touch canonical, session-derived
//! state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use readcache_protocol::ReadMode;
use readcache_protocol::ScopeKey;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

use crate::config::ReadCacheConfig;
use crate::object_store::ObjectStore;
use crate::overlay::OverlayStore;
use crate::replay::ReplayCache;
use crate::replay::ReplayOutcome;
use crate::session::SessionView;

/// Store location under the repository root.
const STORE_SUBDIR: &str = ".pi/readcache";

/// Running totals for the status command. `bytes_baseline` is what the
/// baseline alone would have emitted, `bytes_emitted` what the cache
/// actually served; the gap feeds the tokens-saved estimate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionStats {
    pub mode_counts: HashMap<ReadMode, u64>,
    pub bytes_emitted: u64,
    pub bytes_baseline: u64,
}

impl DecisionStats {
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_baseline.saturating_sub(self.bytes_emitted)
    }

    /// Rough four-bytes-per-token estimate.
    pub fn estimated_tokens_saved(&self) -> u64 {
        self.bytes_saved() / 4
    }
}

#[derive(Default)]
struct RuntimeState {
    replay: ReplayCache,
    overlay: OverlayStore,
    stats: DecisionStats,
}

pub struct ReadCacheRuntime {
    config: ReadCacheConfig,
    store: ObjectStore,
    state: Mutex<RuntimeState>,
}

impl ReadCacheRuntime {
    /// Runtime rooted at `<repo_root>/.pi/readcache`.
    pub fn new(repo_root: &Path, config: ReadCacheConfig) -> Self {
        Self::with_store(ObjectStore::new(repo_root.join(STORE_SUBDIR)), config)
    }

    pub fn with_store(store: ObjectStore, config: ReadCacheConfig) -> Self {
        Self {
            config,
            store,
            state: Mutex::new(RuntimeState::default()),
        }
    }

    pub fn config(&self) -> &ReadCacheConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replay the active branch (memoized) and merge the same-turn overlay
    /// on top. The returned maps are the caller's own copies.
    pub fn knowledge_for<S: SessionView>(&self, session: &S) -> ReplayOutcome {
        let entries = session.branch_entries();
        let session_id = session.session_id();
        let leaf_id = session.leaf_id().unwrap_or_else(Uuid::nil);

        let mut state = self.lock_state();
        state.overlay.activate(session_id, leaf_id);
        let mut outcome = state.replay.replay(session_id, leaf_id, &entries);
        if let Some(overlay) = state.overlay.knowledge(session_id, leaf_id) {
            // A slot served this turn lifts any refresh block for it: the
            // overlay write came from a live anchor-or-better decision.
            for (path_key, scopes) in overlay.iter() {
                if let Some(blocked) = outcome.blocked_ranges.get_mut(path_key) {
                    for scope in scopes.keys() {
                        blocked.remove(scope);
                    }
                    if blocked.is_empty() {
                        outcome.blocked_ranges.remove(path_key);
                    }
                }
            }
            outcome.knowledge.merge_from(overlay);
        }
        outcome
    }

    /// Record same-turn trust for a served decision; returns the overlay
    /// sequence number assigned to it.
    pub fn record_served(
        &self,
        session_id: Uuid,
        leaf_id: Uuid,
        path_key: &str,
        scope: ScopeKey,
        hash: String,
    ) -> u64 {
        self.lock_state()
            .overlay
            .record(session_id, leaf_id, path_key, scope, hash)
    }

    pub fn note_decision(&self, mode: ReadMode, bytes_emitted: u64, bytes_baseline: u64) {
        let mut state = self.lock_state();
        *state.stats.mode_counts.entry(mode).or_insert(0) += 1;
        state.stats.bytes_emitted += bytes_emitted;
        state.stats.bytes_baseline += bytes_baseline;
    }

    pub fn stats(&self) -> DecisionStats {
        self.lock_state().stats.clone()
    }

    /// Discard every memoized replay result and every overlay. Canonical
    /// state (the session entries themselves) is never touched.
    pub fn clear_runtime_caches(&self) {
        let mut state = self.lock_state();
        state.replay.clear();
        state.overlay.clear();
    }

    /// Session start: kick off the best-effort object-store sweep. Failure
    /// never blocks startup.
    pub fn session_start(&self) {
        let store = self.store.clone();
        let retention_ms = self.config.retention.as_millis() as u64;
        tokio::task::spawn_blocking(move || {
            let now_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            let outcome = store.prune_older_than(retention_ms, now_ms);
            if outcome.deleted > 0 {
                debug!(
                    "readcache sweep: deleted {} of {} objects",
                    outcome.deleted, outcome.scanned
                );
            }
        });
    }

    pub fn session_compact(&self) {
        self.clear_runtime_caches();
    }

    pub fn session_tree(&self) {
        self.clear_runtime_caches();
    }

    pub fn session_fork(&self) {
        self.clear_runtime_caches();
    }

    pub fn session_switch(&self) {
        self.clear_runtime_caches();
    }

    pub fn session_shutdown(&self) {
        self.clear_runtime_caches();
    }
}

impl std::fmt::Debug for ReadCacheRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCacheRuntime")
            .field("store", &self.store.root())
            .finish_non_exhaustive()
    }
}

/// Warn-once helper for hosts that wire lifecycle events dynamically.
pub fn dispatch_lifecycle_event(runtime: &ReadCacheRuntime, event: &str) {
    match event {
        "session_start" => runtime.session_start(),
        "session_compact" => runtime.session_compact(),
        "session_tree" => runtime.session_tree(),
        "session_fork" => runtime.session_fork(),
        "session_switch" => runtime.session_switch(),
        "session_shutdown" => runtime.session_shutdown(),
        other => warn!("readcache: ignoring unknown lifecycle event `{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionLog;
    use pretty_assertions::assert_eq;
    use readcache_protocol::EntryBody;
    use serde_json::json;
    use tempfile::TempDir;

    fn runtime() -> (TempDir, ReadCacheRuntime) {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let runtime = ReadCacheRuntime::new(dir.path(), ReadCacheConfig::default());
        (dir, runtime)
    }

    fn anchor_entry(path_key: &str, hash: &str) -> EntryBody {
        EntryBody::ToolResult {
            tool_name: "read".to_string(),
            details: Some(json!({
                "readcache": {
                    "v": 1,
                    "path_key": path_key,
                    "scope_key": "full",
                    "served_hash": hash,
                    "mode": "full",
                    "total_lines": 1,
                    "range_start": 1,
                    "range_end": 1,
                    "bytes": 4,
                }
            })),
        }
    }

    #[test]
    fn overlay_trust_outranks_replayed_trust() {
        let (_dir, runtime) = runtime();
        let mut session = SessionLog::in_memory();
        let replayed = "a".repeat(64);
        let fresh = "b".repeat(64);
        session
            .append_entry(anchor_entry("/repo/a.txt", &replayed))
            .unwrap_or_else(|e| panic!("append: {e}"));

        let leaf = session.leaf_id().unwrap_or_default();
        runtime.record_served(
            session.session_id(),
            leaf,
            "/repo/a.txt",
            ScopeKey::Full,
            fresh.clone(),
        );

        let branch = runtime.knowledge_for(&session);
        assert_eq!(
            branch
                .knowledge
                .trust("/repo/a.txt", &ScopeKey::Full)
                .map(|t| t.hash.clone()),
            Some(fresh)
        );
    }

    #[test]
    fn lifecycle_events_clear_the_overlay() {
        let (_dir, runtime) = runtime();
        let mut session = SessionLog::in_memory();
        session
            .append_entry(EntryBody::Other)
            .unwrap_or_else(|e| panic!("append: {e}"));
        let leaf = session.leaf_id().unwrap_or_default();
        runtime.record_served(
            session.session_id(),
            leaf,
            "/repo/a.txt",
            ScopeKey::Full,
            "c".repeat(64),
        );

        runtime.session_fork();
        let branch = runtime.knowledge_for(&session);
        assert!(branch.knowledge.is_empty());
    }

    #[test]
    fn stats_accumulate_per_decision() {
        let (_dir, runtime) = runtime();
        runtime.note_decision(ReadMode::Full, 100, 100);
        runtime.note_decision(ReadMode::Unchanged, 30, 100);

        let stats = runtime.stats();
        assert_eq!(
            stats.mode_counts,
            maplit::hashmap! {
                ReadMode::Full => 1,
                ReadMode::Unchanged => 1,
            }
        );
        assert_eq!(stats.bytes_saved(), 70);
        assert_eq!(stats.estimated_tokens_saved(), 17);
    }
}
