//! The session entry stream as the runtime sees it.
//!
//! The host session is a parent-linked tree of heterogeneous entries; only
//! three shapes matter here: tool results carrying a read record, custom
//! entries carrying an invalidation, and compaction markers. Everything
//! else deserializes as [`EntryBody::Other`] and is ignored — dispatch is
//! by tag, never by probing dynamic record shapes.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::records::CUSTOM_NAMESPACE;
use crate::records::Invalidation;
use crate::records::ReadMeta;
use crate::records::parse_invalidation;
use crate::records::parse_read_meta;

/// Tool name the read override is registered under.
pub const READ_TOOL_NAME: &str = "read";

/// One entry in a session's entry tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
    #[serde(flatten)]
    pub body: EntryBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryBody {
    /// Result of a tool invocation. The details area may carry a
    /// [`ReadMeta`] when the tool is the intercepted read.
    ToolResult {
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    /// Extension-owned entry; the payload is only interpreted when the
    /// namespace is ours.
    Custom { namespace: String, payload: Value },
    /// Summarization boundary. `first_kept_entry_id` reflects what the
    /// summarizer retained, which is deliberately not consulted for trust:
    /// the barrier is strict.
    Compaction {
        #[serde(skip_serializing_if = "Option::is_none")]
        first_kept_entry_id: Option<Uuid>,
    },
    /// Any entry kind this extension does not care about.
    #[serde(other)]
    Other,
}

impl SessionEntry {
    pub fn new(parent: Option<Uuid>, body: EntryBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent,
            body,
        }
    }

    pub fn tool_result(parent: Option<Uuid>, tool_name: &str, details: Option<Value>) -> Self {
        Self::new(
            parent,
            EntryBody::ToolResult {
                tool_name: tool_name.to_string(),
                details,
            },
        )
    }

    pub fn invalidation(parent: Option<Uuid>, record: &Invalidation) -> Self {
        Self::new(
            parent,
            EntryBody::Custom {
                namespace: CUSTOM_NAMESPACE.to_string(),
                payload: serde_json::to_value(record).unwrap_or(Value::Null),
            },
        )
    }

    pub fn compaction(parent: Option<Uuid>) -> Self {
        Self::new(
            parent,
            EntryBody::Compaction {
                first_kept_entry_id: None,
            },
        )
    }

    /// The validated read record carried by this entry, if any.
    pub fn read_meta(&self) -> Option<ReadMeta> {
        match &self.body {
            EntryBody::ToolResult { tool_name, details } if tool_name == READ_TOOL_NAME => {
                details
                    .as_ref()
                    .and_then(|details| details.get("readcache"))
                    .and_then(parse_read_meta)
            }
            _ => None,
        }
    }

    /// The validated invalidation carried by this entry, if any.
    pub fn invalidation_record(&self) -> Option<Invalidation> {
        match &self.body {
            EntryBody::Custom { namespace, payload } if namespace == CUSTOM_NAMESPACE => {
                parse_invalidation(payload)
            }
            _ => None,
        }
    }

    pub fn is_compaction(&self) -> bool {
        matches!(self.body, EntryBody::Compaction { .. })
    }
}
