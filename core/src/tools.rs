//! The tool surface the host registers: the `read` override and
//! `readcache_refresh`.
//!
//! Definitions use the same JSON-Schema subset the host's other tools are
//! declared with; handlers bridge the host-provided context to the
//! decision engine and the invalidation path.

use std::collections::BTreeMap;
use std::path::Path;

use readcache_protocol::EntryBody;
use readcache_protocol::Invalidation;
use readcache_protocol::ScopeKey;
use readcache_protocol::entries::READ_TOOL_NAME;
use readcache_protocol::records::CUSTOM_NAMESPACE;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::baseline::BaselineReader;
use crate::decision::CancelFlag;
use crate::decision::ReadOutcome;
use crate::decision::ReadToolArgs;
use crate::decision::handle_read;
use crate::decision::resolve_target;
use crate::error::ReadCacheErr;
use crate::error::Result;
use crate::runtime::ReadCacheRuntime;
use crate::session::SessionView;
use crate::text::total_lines;

pub const REFRESH_TOOL_NAME: &str = "readcache_refresh";

/// Generic JSON-Schema subset needed for our tool definitions.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
    Boolean {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Integer {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
    },
    Object {
        properties: BTreeMap<String, JsonSchema>,
        #[serde(skip_serializing_if = "Option::is_none")]
        required: Option<Vec<String>>,
        #[serde(
            rename = "additionalProperties",
            skip_serializing_if = "Option::is_none"
        )]
        additional_properties: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: JsonSchema,
}

pub fn create_read_tool() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "path".to_string(),
        JsonSchema::String {
            description: Some("Absolute or cwd-relative path of the file to read".to_string()),
        },
    );
    properties.insert(
        "offset".to_string(),
        JsonSchema::Integer {
            description: Some("1-based first line to read".to_string()),
            minimum: Some(1),
        },
    );
    properties.insert(
        "limit".to_string(),
        JsonSchema::Integer {
            description: Some("Number of lines to read".to_string()),
            minimum: Some(1),
        },
    );
    properties.insert(
        "bypass".to_string(),
        JsonSchema::Boolean {
            description: Some("Skip cache markers and return the full content".to_string()),
        },
    );

    ToolSpec {
        name: READ_TOOL_NAME.to_string(),
        description: "Reads a file, returning a compact marker or diff when the current content \
                      was already observed in this conversation"
            .to_string(),
        parameters: JsonSchema::Object {
            properties,
            required: Some(vec!["path".to_string()]),
            additional_properties: Some(false),
        },
    }
}

pub fn create_refresh_tool() -> ToolSpec {
    let mut properties = BTreeMap::new();
    properties.insert(
        "path".to_string(),
        JsonSchema::String {
            description: Some("File whose cached knowledge should be discarded".to_string()),
        },
    );
    properties.insert(
        "offset".to_string(),
        JsonSchema::Integer {
            description: Some("1-based first line of the range to refresh".to_string()),
            minimum: Some(1),
        },
    );
    properties.insert(
        "limit".to_string(),
        JsonSchema::Integer {
            description: Some("Number of lines to refresh".to_string()),
            minimum: Some(1),
        },
    );

    ToolSpec {
        name: REFRESH_TOOL_NAME.to_string(),
        description: "Forgets cached read knowledge for a file or line range so the next read \
                      returns full content"
            .to_string(),
        parameters: JsonSchema::Object {
            properties,
            required: Some(vec!["path".to_string()]),
            additional_properties: Some(false),
        },
    }
}

/// Everything the handlers need from the host. Invocations without one
/// fail with [`ReadCacheErr::MissingContext`].
pub struct ToolContext<'a, B, S> {
    pub runtime: &'a ReadCacheRuntime,
    pub session: &'a mut S,
    pub baseline: &'a B,
    pub cwd: &'a Path,
}

/// Entry point for the `read` tool.
pub async fn handle_read_tool<B, S>(
    context: Option<ToolContext<'_, B, S>>,
    arguments: Value,
    cancel: &CancelFlag,
) -> Result<ReadOutcome>
where
    B: BaselineReader,
    S: SessionView,
{
    let Some(context) = context else {
        return Err(ReadCacheErr::MissingContext);
    };
    let args: ReadToolArgs = serde_json::from_value(arguments)
        .map_err(|err| ReadCacheErr::Validation(format!("invalid read arguments: {err}")))?;
    handle_read(
        context.runtime,
        &*context.session,
        context.baseline,
        context.cwd,
        args,
        cancel,
    )
    .await
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RefreshToolArgs {
    pub path: String,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Entry point for the `readcache_refresh` tool: normalizes the target,
/// appends the invalidation entry under the reserved namespace, and drops
/// the in-memory replay memo and overlay.
pub async fn handle_refresh_tool<S: SessionView>(
    runtime: &ReadCacheRuntime,
    session: &mut S,
    cwd: &Path,
    args: RefreshToolArgs,
) -> Result<String> {
    let record = build_invalidation(cwd, &args.path, args.offset, args.limit).await?;
    let summary = format!("readcache: forgot {} ({})", record.path_key, record.scope_key);
    session.append_entry(EntryBody::Custom {
        namespace: CUSTOM_NAMESPACE.to_string(),
        payload: serde_json::to_value(&record)?,
    })?;
    runtime.clear_runtime_caches();
    Ok(summary)
}

async fn build_invalidation(
    cwd: &Path,
    raw_path: &str,
    offset: Option<u32>,
    limit: Option<u32>,
) -> Result<Invalidation> {
    let target = resolve_target(cwd, raw_path, offset, limit)?;
    if target.offset == Some(0) || target.limit == Some(0) {
        return Err(ReadCacheErr::Validation(
            "offset and limit must be positive integers".to_string(),
        ));
    }

    let scope = match (target.offset, target.limit) {
        (None, None) => ScopeKey::Full,
        (offset, limit) => {
            let start = offset.unwrap_or(1);
            let live_text = tokio::fs::read(&target.path)
                .await
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match live_text {
                Some(text) => {
                    let total = total_lines(&text);
                    let end = limit
                        .map(|limit| start.saturating_add(limit - 1))
                        .unwrap_or(total)
                        .min(total);
                    ScopeKey::canonical(start, end, total)
                }
                // Without the file there is nothing to canonicalize
                // against; a bounded window stays a range, an open-ended
                // one falls back to the full scope.
                None => match limit {
                    Some(limit) => ScopeKey::Range {
                        start,
                        end: start.saturating_add(limit - 1),
                    },
                    None => ScopeKey::Full,
                },
            }
        }
    };

    let at = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    Ok(Invalidation::new(target.path_key, scope, at))
}
