//! The two record kinds the runtime persists into session entries: a
//! per-read result ([`ReadMeta`]) and an explicit refresh
//! ([`Invalidation`]).
//!
//! Parsing is fail-open by design: a record that does not validate yields
//! `None` and replay proceeds as if the entry were absent. No error ever
//! escapes this module.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;
use tracing::debug;

use crate::scope::ScopeKey;

/// Version stamped into every persisted record. Records with any other
/// version are ignored during replay.
pub const META_VERSION: u32 = 1;

/// Namespace under which [`Invalidation`] records are appended to the
/// session as custom entries.
pub const CUSTOM_NAMESPACE: &str = "readcache";

/// How a read result was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReadMode {
    /// Full file body was emitted.
    Full,
    /// Content was byte-identical to the trusted base; a marker was emitted.
    Unchanged,
    /// The requested range was identical to the base; a marker was emitted.
    UnchangedRange,
    /// A unified diff against the trusted base was emitted.
    Diff,
    /// A base existed but could not be used; the baseline body was emitted.
    BaselineFallback,
}

impl ReadMode {
    /// Anchor modes may bootstrap trust without any prior trust for the
    /// slot. Everything else requires a validated base chain.
    pub fn is_anchor(&self) -> bool {
        matches!(self, ReadMode::Full | ReadMode::BaselineFallback)
    }

    /// Derived modes require `base_hash` to be present.
    pub fn requires_base(&self) -> bool {
        matches!(
            self,
            ReadMode::Unchanged | ReadMode::UnchangedRange | ReadMode::Diff
        )
    }
}

/// Result record attached to every intercepted read, persisted in the
/// details area of the tool-result entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadMeta {
    pub v: u32,
    pub path_key: String,
    pub scope_key: ScopeKey,
    /// Digest of the file body that was current at decision time.
    pub served_hash: String,
    /// Digest of the trusted base this read was compared against. Required
    /// for the derived modes, optional otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_hash: Option<String>,
    pub mode: ReadMode,
    pub total_lines: u32,
    pub range_start: u32,
    pub range_end: u32,
    /// Size in bytes of the body that was actually emitted.
    pub bytes: u64,
}

impl ReadMeta {
    /// Whether this record satisfies every mode-dependent field rule.
    pub fn is_valid(&self) -> bool {
        if self.v != META_VERSION {
            return false;
        }
        if self.path_key.is_empty() || self.served_hash.is_empty() {
            return false;
        }
        match &self.base_hash {
            Some(base) if base.is_empty() => return false,
            None if self.mode.requires_base() => return false,
            _ => {}
        }
        self.total_lines >= 1 && self.range_start >= 1 && self.range_end >= self.range_start
    }
}

/// Explicit refresh record: erases trust for one scope (or, for the full
/// scope, the whole path) during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub v: u32,
    pub kind: String,
    pub path_key: String,
    pub scope_key: ScopeKey,
    /// Milliseconds since the Unix epoch at which the refresh was requested.
    pub at: u64,
}

/// `kind` discriminator for [`Invalidation`].
pub const INVALIDATION_KIND: &str = "invalidate";

impl Invalidation {
    pub fn new(path_key: String, scope_key: ScopeKey, at: u64) -> Self {
        Self {
            v: META_VERSION,
            kind: INVALIDATION_KIND.to_string(),
            path_key,
            scope_key,
            at,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.v == META_VERSION && self.kind == INVALIDATION_KIND && !self.path_key.is_empty()
    }
}

/// Extract a validated [`ReadMeta`] from an untyped details record, or
/// `None` when the record is absent, malformed, or from an unknown version.
pub fn parse_read_meta(value: &Value) -> Option<ReadMeta> {
    if value.get("v").and_then(Value::as_u64) != Some(META_VERSION as u64) {
        return None;
    }
    let meta: ReadMeta = match serde_json::from_value(value.clone()) {
        Ok(meta) => meta,
        Err(err) => {
            debug!("ignoring malformed read meta record: {err}");
            return None;
        }
    };
    meta.is_valid().then_some(meta)
}

/// Extract a validated [`Invalidation`] from an untyped custom payload.
pub fn parse_invalidation(value: &Value) -> Option<Invalidation> {
    if value.get("v").and_then(Value::as_u64) != Some(META_VERSION as u64) {
        return None;
    }
    let record: Invalidation = match serde_json::from_value(value.clone()) {
        Ok(record) => record,
        Err(err) => {
            debug!("ignoring malformed invalidation record: {err}");
            return None;
        }
    };
    record.is_valid().then_some(record)
}
