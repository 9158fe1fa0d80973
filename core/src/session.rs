//! Access to the host's session entry tree, behind a facade so the runtime
//! never depends on how the host stores conversations.
//!
//! [`SessionLog`] is the bundled implementation: a parent-linked entry tree
//! persisted as JSONL, one entry per line, so sessions can be reopened and
//! replayed after a restart. Appends are advisory-locked single-syscall
//! writes, which keeps concurrent appenders from interleaving lines.

use std::collections::HashMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use readcache_protocol::EntryBody;
use readcache_protocol::SessionEntry;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const MAX_LOCK_RETRIES: usize = 10;
const LOCK_RETRY_SLEEP: Duration = Duration::from_millis(100);

/// Read-mostly facade over the host's session store.
pub trait SessionView {
    fn session_id(&self) -> Uuid;

    /// The currently active leaf, or `None` for a session with no entries.
    fn leaf_id(&self) -> Option<Uuid>;

    /// The ordered root-to-leaf path for the active leaf.
    fn branch_entries(&self) -> Vec<SessionEntry>;

    /// Every entry in the session, in append order.
    fn entries(&self) -> Vec<SessionEntry>;

    fn entry(&self, id: Uuid) -> Option<SessionEntry>;

    /// Append a new entry under the active leaf and make it the leaf.
    fn append_entry(&mut self, body: EntryBody) -> Result<Uuid>;
}

/// First line of every session log file.
#[derive(Debug, Serialize, Deserialize)]
struct SessionLogMeta {
    id: Uuid,
    timestamp: String,
}

/// Parent-linked entry tree, optionally mirrored to a JSONL file.
#[derive(Debug)]
pub struct SessionLog {
    session_id: Uuid,
    file_path: Option<PathBuf>,
    entries: Vec<SessionEntry>,
    index: HashMap<Uuid, usize>,
    leaf: Option<Uuid>,
}

impl SessionLog {
    /// A log that lives only in memory. Used by tests and by hosts that do
    /// their own persistence.
    pub fn in_memory() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            file_path: None,
            entries: Vec::new(),
            index: HashMap::new(),
            leaf: None,
        }
    }

    /// Create a new persisted log under `dir`, named
    /// `session-<date>-<uuid>.jsonl`.
    pub fn create(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let session_id = Uuid::new_v4();
        let timestamp = OffsetDateTime::now_utc();

        let date_format: &[FormatItem] = format_description!("[year]-[month]-[day]");
        let date = timestamp
            .format(date_format)
            .map_err(|e| std::io::Error::other(format!("failed to format date: {e}")))?;
        let timestamp_format: &[FormatItem] = format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        );
        let timestamp = timestamp
            .format(timestamp_format)
            .map_err(|e| std::io::Error::other(format!("failed to format timestamp: {e}")))?;

        let file_path = dir.join(format!("session-{date}-{session_id}.jsonl"));
        let log = Self {
            session_id,
            file_path: Some(file_path),
            entries: Vec::new(),
            index: HashMap::new(),
            leaf: None,
        };
        log.persist_line(&serde_json::to_string(&SessionLogMeta {
            id: session_id,
            timestamp,
        })?)?;
        Ok(log)
    }

    /// Reopen a persisted log. Malformed entry lines are skipped with a
    /// warning; the active leaf becomes the last entry in the file.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let meta_line = lines.next().transpose()?.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "empty session log")
        })?;
        let meta: SessionLogMeta = serde_json::from_str(&meta_line).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("malformed session log meta: {e}"),
            )
        })?;

        let mut log = Self {
            session_id: meta.id,
            file_path: Some(path.to_path_buf()),
            entries: Vec::new(),
            index: HashMap::new(),
            leaf: None,
        };
        for line in lines {
            let line = line?;
            match serde_json::from_str::<SessionEntry>(&line) {
                Ok(entry) => {
                    log.leaf = Some(entry.id);
                    log.index.insert(entry.id, log.entries.len());
                    log.entries.push(entry);
                }
                Err(e) => warn!("session log: skipping malformed entry line: {e}"),
            }
        }
        Ok(log)
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Append under an explicit parent, creating a sibling branch when the
    /// parent already has children. The new entry becomes the active leaf.
    pub fn append_under(&mut self, parent: Option<Uuid>, body: EntryBody) -> Result<Uuid> {
        let entry = SessionEntry::new(parent, body);
        if self.file_path.is_some() {
            self.persist_line(&serde_json::to_string(&entry)?)?;
        }
        let id = entry.id;
        self.index.insert(id, self.entries.len());
        self.entries.push(entry);
        self.leaf = Some(id);
        Ok(id)
    }

    /// Make an existing entry the active leaf. Returns false when the id is
    /// unknown.
    pub fn switch_leaf(&mut self, id: Uuid) -> bool {
        if self.index.contains_key(&id) {
            self.leaf = Some(id);
            true
        } else {
            false
        }
    }

    /// Append one prepared line with a trailing newline in a single
    /// `write(2)` while holding an exclusive advisory lock.
    fn persist_line(&self, line: &str) -> std::io::Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.append(true).read(true).create(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        ensure_owner_only_permissions(&file)?;
        acquire_exclusive_lock_with_retry(&file)?;

        let mut payload = line.to_string();
        payload.push('\n');
        file.write_all(payload.as_bytes())?;
        file.flush()
    }
}

impl SessionView for SessionLog {
    fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn leaf_id(&self) -> Option<Uuid> {
        self.leaf
    }

    fn branch_entries(&self) -> Vec<SessionEntry> {
        let mut path = Vec::new();
        let mut cursor = self.leaf;
        while let Some(id) = cursor {
            let Some(&idx) = self.index.get(&id) else {
                break;
            };
            let entry = &self.entries[idx];
            cursor = entry.parent;
            path.push(entry.clone());
        }
        path.reverse();
        path
    }

    fn entries(&self) -> Vec<SessionEntry> {
        self.entries.clone()
    }

    fn entry(&self, id: Uuid) -> Option<SessionEntry> {
        self.index.get(&id).map(|&idx| self.entries[idx].clone())
    }

    fn append_entry(&mut self, body: EntryBody) -> Result<Uuid> {
        self.append_under(self.leaf, body)
    }
}

fn acquire_exclusive_lock_with_retry(file: &File) -> std::io::Result<()> {
    for _ in 0..MAX_LOCK_RETRIES {
        match fs2::FileExt::try_lock_exclusive(file) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(LOCK_RETRY_SLEEP);
            }
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::WouldBlock,
        "could not acquire exclusive lock on session log after multiple attempts",
    ))
}

/// On Unix, keep the log readable by the owning user only.
#[cfg(unix)]
fn ensure_owner_only_permissions(file: &File) -> std::io::Result<()> {
    let metadata = file.metadata()?;
    let current_mode = metadata.permissions().mode() & 0o777;
    if current_mode != 0o600 {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_owner_only_permissions(_file: &File) -> std::io::Result<()> {
    Ok(())
}
