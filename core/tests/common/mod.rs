// Each test binary compiles its own copy of this module and uses a
// different subset of the helpers.
#![allow(dead_code)]

use std::path::PathBuf;

use readcache_core::CancelFlag;
use readcache_core::ReadCacheConfig;
use readcache_core::ReadCacheRuntime;
use readcache_core::ReadOutcome;
use readcache_core::ReadToolArgs;
use readcache_core::SessionLog;
use readcache_core::SessionView;
use readcache_core::baseline::FsBaselineReader;
use readcache_core::handle_read;
use readcache_protocol::EntryBody;
use readcache_protocol::ReadMode;
use serde_json::json;
use tempfile::TempDir;

/// A repo directory, a runtime rooted in it, and a session to read
/// against. Mirrors how the host wires the extension: the harness plays
/// the host's role of persisting each read's metadata record into the
/// session once the turn flushes.
pub struct Harness {
    pub dir: TempDir,
    pub runtime: ReadCacheRuntime,
    pub session: SessionLog,
    pub cancel: CancelFlag,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReadCacheConfig::default())
    }

    pub fn with_config(config: ReadCacheConfig) -> Self {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let runtime = ReadCacheRuntime::new(dir.path(), config);
        Self {
            dir,
            runtime,
            session: SessionLog::in_memory(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_persisted_session() -> Self {
        let mut harness = Self::new();
        let sessions_dir = harness.dir.path().join("sessions");
        harness.session =
            SessionLog::create(&sessions_dir).unwrap_or_else(|e| panic!("create session: {e}"));
        harness
    }

    pub fn write_file(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).unwrap_or_else(|e| panic!("write {name}: {e}"));
        path
    }

    /// `"line 1"` .. `"line N"`, one per line, shaped by `render`.
    pub fn numbered_file(&self, name: &str, lines: u32, render: impl Fn(u32) -> String) -> PathBuf {
        let body: String = (1..=lines).map(|n| format!("{}\n", render(n))).collect();
        self.write_file(name, &body)
    }

    /// Read and, like the host at turn end, persist the resulting metadata
    /// record into the session.
    pub async fn read(&mut self, raw_path: &str) -> ReadOutcome {
        self.invoke(
            ReadToolArgs {
                path: raw_path.to_string(),
                ..Default::default()
            },
            true,
        )
        .await
    }

    /// Read without persisting the result: the turn has not flushed yet,
    /// so only the overlay knows about it.
    pub async fn read_unflushed(&mut self, raw_path: &str) -> ReadOutcome {
        self.invoke(
            ReadToolArgs {
                path: raw_path.to_string(),
                ..Default::default()
            },
            false,
        )
        .await
    }

    pub async fn invoke(&mut self, args: ReadToolArgs, flush: bool) -> ReadOutcome {
        let outcome = handle_read(
            &self.runtime,
            &self.session,
            &FsBaselineReader,
            self.dir.path(),
            args,
            &self.cancel,
        )
        .await
        .unwrap_or_else(|e| panic!("read failed: {e}"));
        if flush {
            self.flush(&outcome);
        }
        outcome
    }

    /// Persist a decision's metadata record the way the host does.
    pub fn flush(&mut self, outcome: &ReadOutcome) {
        if let Some(meta) = &outcome.meta {
            self.session
                .append_entry(EntryBody::ToolResult {
                    tool_name: "read".to_string(),
                    details: Some(json!({ "readcache": meta })),
                })
                .unwrap_or_else(|e| panic!("append: {e}"));
        }
    }

    pub fn object_path(&self, hash: &str) -> PathBuf {
        self.runtime
            .store()
            .root()
            .join("objects")
            .join(format!("sha256-{hash}.txt"))
    }
}

pub fn mode(outcome: &ReadOutcome) -> ReadMode {
    outcome
        .meta
        .as_ref()
        .map(|meta| meta.mode)
        .unwrap_or_else(|| panic!("expected a metadata record"))
}
