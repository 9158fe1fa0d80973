//! The read-tool override: decides, per request, whether the model already
//! observed the current content of the requested scope on the active
//! branch, and serves a compact marker or diff instead of the full bytes
//! when it provably has.
//!
//! Uncertainty always degrades to the baseline result. The only errors
//! that surface are validation problems, a missing host context, and
//! cancellation.

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use readcache_protocol::ReadMeta;
use readcache_protocol::ReadMode;
use readcache_protocol::ScopeKey;
use readcache_protocol::records::META_VERSION;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;
use wildmatch::WildMatch;

use crate::baseline::BASELINE_MAX_BYTES;
use crate::baseline::BASELINE_MAX_LINES;
use crate::baseline::BaselineOutcome;
use crate::baseline::BaselineReader;
use crate::baseline::BaselineRequest;
use crate::baseline::ContentBlock;
use crate::baseline::Truncation;
use crate::diff::MAX_DIFF_INPUT_BYTES;
use crate::diff::MAX_DIFF_INPUT_LINES;
use crate::diff::unified_diff;
use crate::error::ReadCacheErr;
use crate::error::Result;
use crate::object_store::hash_bytes;
use crate::replay::select_base;
use crate::runtime::ReadCacheRuntime;
use crate::session::SessionView;
use crate::text::slice_lines;
use crate::text::total_lines;

/// File names that must never receive cache treatment.
pub const SENSITIVE_PATH_PATTERNS: &[&str] = &[
    ".env*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "*.crt",
    "*.cer",
    "*.der",
    "*.pk8",
    "id_rsa",
    "id_ed25519",
    ".npmrc",
    ".netrc",
];

/// Arguments of the `read` tool.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ReadToolArgs {
    pub path: String,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub bypass: Option<bool>,
}

/// Cooperative cancellation: a shared read-only flag the engine polls at
/// its suspension points, converted into the uniform aborted error.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ReadCacheErr::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// What the override hands back to the host: content blocks, the
/// baseline's truncation record when one applies, and the metadata record
/// the host persists with the tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub blocks: Vec<ContentBlock>,
    pub truncation: Option<Truncation>,
    pub meta: Option<ReadMeta>,
}

impl ReadOutcome {
    fn untouched(outcome: BaselineOutcome) -> Self {
        Self {
            blocks: outcome.blocks,
            truncation: outcome.truncation,
            meta: None,
        }
    }

    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }
}

/// A parsed and resolved read target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub path: PathBuf,
    pub path_key: String,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

/// Resolve the raw path argument, applying the trailing `:n` / `:n-m`
/// shorthand when no explicit window was supplied and the raw path does
/// not name an existing file.
pub fn resolve_target(
    cwd: &Path,
    raw: &str,
    offset: Option<u32>,
    limit: Option<u32>,
) -> Result<ResolvedTarget> {
    if offset.is_some() || limit.is_some() {
        let path = absolutize(cwd, raw);
        return Ok(ResolvedTarget {
            path_key: canonical_key(&path),
            path,
            offset,
            limit,
        });
    }

    let direct = absolutize(cwd, raw);
    if direct.exists() {
        return Ok(ResolvedTarget {
            path_key: canonical_key(&direct),
            path: direct,
            offset: None,
            limit: None,
        });
    }

    if let Some((prefix, suffix)) = raw.rsplit_once(':') {
        let candidate = absolutize(cwd, prefix);
        if candidate.exists() {
            let Some((start, end)) = parse_range_suffix(suffix) else {
                return Err(ReadCacheErr::Validation(format!(
                    "invalid range `{suffix}` in `{raw}`"
                )));
            };
            let limit = end.map(|end| end - start + 1).unwrap_or(1);
            return Ok(ResolvedTarget {
                path_key: canonical_key(&candidate),
                path: candidate,
                offset: Some(start),
                limit: Some(limit),
            });
        }
    }

    // Nothing matched; let the baseline surface whatever error applies.
    Ok(ResolvedTarget {
        path_key: canonical_key(&direct),
        path: direct,
        offset: None,
        limit: None,
    })
}

/// Parse `n` or `n-m` with positive integers and `m >= n`.
pub(crate) fn parse_range_suffix(suffix: &str) -> Option<(u32, Option<u32>)> {
    if let Some((start, end)) = suffix.split_once('-') {
        let start: u32 = start.parse().ok()?;
        let end: u32 = end.parse().ok()?;
        (start >= 1 && end >= start).then_some((start, Some(end)))
    } else {
        let start: u32 = suffix.parse().ok()?;
        (start >= 1).then_some((start, None))
    }
}

fn absolutize(cwd: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

/// Canonical absolute path with symlinks resolved where possible; falls
/// back to a lexical cleanup when the file does not exist yet.
fn canonical_key(path: &Path) -> String {
    match std::fs::canonicalize(path) {
        Ok(resolved) => resolved.to_string_lossy().into_owned(),
        Err(_) => {
            let mut cleaned = PathBuf::new();
            for component in path.components() {
                match component {
                    Component::CurDir => {}
                    Component::ParentDir => {
                        cleaned.pop();
                    }
                    other => cleaned.push(other),
                }
            }
            cleaned.to_string_lossy().into_owned()
        }
    }
}

fn is_sensitive_path(path: &Path, extra_patterns: &[String]) -> bool {
    let Some(name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        return false;
    };
    SENSITIVE_PATH_PATTERNS
        .iter()
        .copied()
        .chain(extra_patterns.iter().map(String::as_str))
        .any(|pattern| WildMatch::new(pattern).matches(&name))
}

struct DecisionContext<'a> {
    runtime: &'a ReadCacheRuntime,
    session_id: uuid::Uuid,
    leaf_id: uuid::Uuid,
    path_key: String,
    scope: ScopeKey,
    current_hash: String,
    current_text: String,
    total_lines: u32,
    start: u32,
    end: u32,
    baseline_bytes: u64,
    cancel: CancelFlag,
}

impl DecisionContext<'_> {
    /// Common tail of every completion path: persist the current body,
    /// record same-turn trust in the overlay, note stats, and attach the
    /// metadata record.
    fn finish(
        &self,
        mode: ReadMode,
        base_hash: Option<String>,
        blocks: Vec<ContentBlock>,
        truncation: Option<Truncation>,
    ) -> Result<ReadOutcome> {
        self.cancel.checkpoint()?;

        if let Err(err) = self
            .runtime
            .store()
            .put_if_absent(&self.current_hash, &self.current_text)
        {
            warn!("readcache: failed to persist object {}: {err}", self.current_hash);
        }
        self.runtime.record_served(
            self.session_id,
            self.leaf_id,
            &self.path_key,
            self.scope,
            self.current_hash.clone(),
        );

        let bytes: u64 = blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.len() as u64,
                ContentBlock::Image { .. } => 0,
            })
            .sum();
        self.runtime.note_decision(mode, bytes, self.baseline_bytes);
        debug!(
            "readcache: {} {} -> {mode}",
            self.path_key, self.scope
        );

        Ok(ReadOutcome {
            blocks,
            truncation,
            meta: Some(ReadMeta {
                v: META_VERSION,
                path_key: self.path_key.clone(),
                scope_key: self.scope,
                served_hash: self.current_hash.clone(),
                base_hash,
                mode,
                total_lines: self.total_lines,
                range_start: self.start,
                range_end: self.end,
                bytes,
            }),
        })
    }

    fn finish_marker(
        &self,
        mode: ReadMode,
        base_hash: String,
        marker: String,
    ) -> Result<ReadOutcome> {
        self.finish(
            mode,
            Some(base_hash),
            vec![ContentBlock::Text { text: marker }],
            None,
        )
    }

    fn finish_baseline(
        &self,
        mode: ReadMode,
        base_hash: Option<String>,
        outcome: &BaselineOutcome,
    ) -> Result<ReadOutcome> {
        self.finish(
            mode,
            base_hash,
            outcome.blocks.clone(),
            outcome.truncation,
        )
    }
}

/// The `read` override.
pub async fn handle_read<B, S>(
    runtime: &ReadCacheRuntime,
    session: &S,
    baseline: &B,
    cwd: &Path,
    args: ReadToolArgs,
    cancel: &CancelFlag,
) -> Result<ReadOutcome>
where
    B: BaselineReader,
    S: SessionView,
{
    let target = resolve_target(cwd, &args.path, args.offset, args.limit)?;

    // The baseline produces the envelope every degraded path reuses.
    let baseline_outcome = baseline
        .read(&BaselineRequest {
            path: target.path.clone(),
            offset: target.offset,
            limit: target.limit,
        })
        .await?;

    if !runtime.config().enabled {
        return Ok(ReadOutcome::untouched(baseline_outcome));
    }
    if baseline_outcome.has_image() {
        return Ok(ReadOutcome::untouched(baseline_outcome));
    }
    if is_sensitive_path(&target.path, &runtime.config().extra_sensitive_patterns) {
        return Ok(ReadOutcome::untouched(baseline_outcome));
    }

    cancel.checkpoint()?;
    let current_text = match tokio::fs::read(&target.path).await {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            // Not strict UTF-8: the cache stays out of the way.
            Err(_) => return Ok(ReadOutcome::untouched(baseline_outcome)),
        },
        Err(err) => {
            warn!("readcache: failed to re-read {}: {err}", target.path.display());
            return Ok(ReadOutcome::untouched(baseline_outcome));
        }
    };

    let current_hash = hash_bytes(current_text.as_bytes());
    let total = total_lines(&current_text);
    let start = target.offset.unwrap_or(1);
    if start == 0 || target.limit == Some(0) {
        return Err(ReadCacheErr::Validation(
            "offset and limit must be positive integers".to_string(),
        ));
    }
    if start > total {
        return Err(ReadCacheErr::Validation(format!(
            "offset {start} is beyond the end of the file ({total} lines)"
        )));
    }
    let end = target
        .limit
        .map(|limit| start.saturating_add(limit - 1))
        .unwrap_or(total)
        .min(total);
    let scope = ScopeKey::canonical(start, end, total);

    let ctx = DecisionContext {
        runtime,
        session_id: session.session_id(),
        leaf_id: session.leaf_id().unwrap_or_else(uuid::Uuid::nil),
        path_key: target.path_key.clone(),
        scope,
        current_hash: current_hash.clone(),
        current_text: current_text.clone(),
        total_lines: total,
        start,
        end,
        baseline_bytes: baseline_outcome.text().len() as u64,
        cancel: cancel.clone(),
    };

    if args.bypass == Some(true) {
        return ctx.finish_baseline(ReadMode::Full, None, &baseline_outcome);
    }

    let branch = runtime.knowledge_for(session);
    let Some(candidate) = select_base(
        &branch.knowledge,
        &branch.blocked_ranges,
        &target.path_key,
        &scope,
    ) else {
        return ctx.finish_baseline(ReadMode::Full, None, &baseline_outcome);
    };

    if candidate.hash == current_hash {
        let (mode, marker) = match scope {
            ScopeKey::Full => (
                ReadMode::Unchanged,
                format!("[readcache: unchanged, {total} lines]"),
            ),
            ScopeKey::Range { .. } => (
                ReadMode::UnchangedRange,
                format!("[readcache: unchanged in lines {start}-{end} of {total}]"),
            ),
        };
        return ctx.finish_marker(mode, candidate.hash, marker);
    }

    cancel.checkpoint()?;
    let base_text = match runtime.store().load(&candidate.hash).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            return ctx.finish_baseline(
                ReadMode::BaselineFallback,
                Some(candidate.hash),
                &baseline_outcome,
            );
        }
        Err(err) => {
            warn!("readcache: failed to load base {}: {err}", candidate.hash);
            return ctx.finish_baseline(
                ReadMode::BaselineFallback,
                Some(candidate.hash),
                &baseline_outcome,
            );
        }
    };

    if let ScopeKey::Range { .. } = scope {
        // No range-level diffs: either the slice is untouched, or the
        // baseline body is served.
        let base_slice = slice_lines(&base_text, start, end);
        let current_slice = slice_lines(&current_text, start, end);
        return if base_slice == current_slice {
            ctx.finish_marker(
                ReadMode::UnchangedRange,
                candidate.hash,
                format!(
                    "[readcache: unchanged in lines {start}-{end}; changes exist outside this range]"
                ),
            )
        } else {
            ctx.finish_baseline(
                ReadMode::BaselineFallback,
                Some(candidate.hash),
                &baseline_outcome,
            )
        };
    }

    // Full scope with a changed file: try the diff pipeline.
    cancel.checkpoint()?;
    let base_bytes = base_text.len() as u64;
    let current_bytes = current_text.len() as u64;
    if base_bytes.max(current_bytes) > MAX_DIFF_INPUT_BYTES
        || total_lines(&base_text).max(total) > MAX_DIFF_INPUT_LINES
    {
        return ctx.finish_baseline(
            ReadMode::BaselineFallback,
            Some(candidate.hash),
            &baseline_outcome,
        );
    }

    let display_path = target
        .path
        .strip_prefix(cwd)
        .unwrap_or(&target.path)
        .to_string_lossy()
        .into_owned();
    let Some(diff) = unified_diff(&display_path, &base_text, &current_text) else {
        return ctx.finish_baseline(
            ReadMode::BaselineFallback,
            Some(candidate.hash),
            &baseline_outcome,
        );
    };

    // The diff is only worth emitting when it is smaller than the body it
    // replaces and does not touch more lines than the selection holds, and
    // when it fits the same limits the baseline applies to content.
    let useful = (diff.text.len() as u64) < current_bytes && diff.changed_lines <= total;
    let fits = diff.text.len() as u64 <= BASELINE_MAX_BYTES
        && total_lines(&diff.text) <= BASELINE_MAX_LINES;
    if !useful || !fits {
        return ctx.finish_baseline(
            ReadMode::BaselineFallback,
            Some(candidate.hash),
            &baseline_outcome,
        );
    }

    let payload = format!(
        "[readcache: {} lines changed of {total}]\n{}",
        diff.changed_lines, diff.text
    );
    ctx.finish(
        ReadMode::Diff,
        Some(candidate.hash),
        vec![ContentBlock::Text { text: payload }],
        None,
    )
}
