//! Slash commands: `readcache-status` and `readcache-refresh`.
//!
//! These are the outermost user-facing seam, so they speak `anyhow` and
//! return rendered text for the host to print.

use std::path::Path;

use anyhow::bail;
use readcache_protocol::ReadMode;

use crate::runtime::ReadCacheRuntime;
use crate::session::SessionView;
use crate::tools::RefreshToolArgs;
use crate::tools::handle_refresh_tool;

const MODE_ORDER: [ReadMode; 5] = [
    ReadMode::Full,
    ReadMode::Unchanged,
    ReadMode::UnchangedRange,
    ReadMode::Diff,
    ReadMode::BaselineFallback,
];

/// Render the `readcache-status` report for the active branch.
pub fn readcache_status<S: SessionView>(runtime: &ReadCacheRuntime, session: &S) -> String {
    let branch = runtime.knowledge_for(session);
    let stats = runtime.stats();
    let store = runtime.store().stats();

    let mut modes = String::new();
    for mode in MODE_ORDER {
        let count = branch.mode_counts.get(&mode).copied().unwrap_or(0);
        if !modes.is_empty() {
            modes.push(' ');
        }
        modes.push_str(&format!("{mode}={count}"));
    }

    format!(
        "readcache status\n\
           tracked: {paths} paths, {scopes} scopes\n\
           replay window: {window} entries ({records} read records)\n\
           modes: {modes}\n\
           est. tokens saved: ~{tokens}\n\
           object store: {objects} objects, {bytes} bytes",
        paths = branch.knowledge.tracked_paths(),
        scopes = branch.knowledge.tracked_scopes(),
        window = branch.window_entries,
        records = branch.read_records,
        tokens = stats.estimated_tokens_saved(),
        objects = store.objects,
        bytes = store.bytes,
    )
}

/// `readcache-refresh <path> [n|n-m]` — parses the optional trailing range
/// argument, then behaves exactly like the refresh tool.
pub async fn readcache_refresh<S: SessionView>(
    runtime: &ReadCacheRuntime,
    session: &mut S,
    cwd: &Path,
    args: &str,
) -> anyhow::Result<String> {
    let mut parts = args.split_whitespace();
    let Some(path) = parts.next() else {
        bail!("usage: readcache-refresh <path> [start-end]");
    };
    let range = parts.next();
    if parts.next().is_some() {
        bail!("usage: readcache-refresh <path> [start-end]");
    }

    let (offset, limit) = match range {
        None => (None, None),
        Some(range) => {
            let Some((start, end)) = crate::decision::parse_range_suffix(range) else {
                bail!("invalid range `{range}`; expected `n` or `n-m`");
            };
            let limit = end.map(|end| end - start + 1).unwrap_or(1);
            (Some(start), Some(limit))
        }
    };

    let summary = handle_refresh_tool(
        runtime,
        session,
        cwd,
        RefreshToolArgs {
            path: path.to_string(),
            offset,
            limit,
        },
    )
    .await?;
    Ok(summary)
}
