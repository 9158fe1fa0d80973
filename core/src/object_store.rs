//! Content-addressed blob store backing diffs and range comparisons across
//! restarts.
//!
//! Objects live under `<root>/objects/sha256-<64hex>.txt` with a sibling
//! `tmp/` directory for in-flight writes. The store is shared across
//! sessions; there is no global lock. The atomic create-rename of a temp
//! file is the only serialization, and it is sufficient because the key is
//! the content hash: two writers racing on the same object both succeed,
//! with the loser discarding its temp file.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use sha2::Digest;
use sha2::Sha256;
use tracing::warn;

use crate::error::ReadCacheErr;
use crate::error::Result;

const OBJECTS_SUBDIR: &str = "objects";
const TMP_SUBDIR: &str = "tmp";
const OBJECT_PREFIX: &str = "sha256-";
const OBJECT_SUFFIX: &str = ".txt";

/// Lowercase-hex SHA-256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub objects: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub scanned: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_SUBDIR)
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_SUBDIR)
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        self.objects_dir()
            .join(format!("{OBJECT_PREFIX}{hash}{OBJECT_SUFFIX}"))
    }

    fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [self.root.clone(), self.objects_dir(), self.tmp_dir()] {
            std::fs::create_dir_all(&dir)?;
            ensure_owner_only_dir(&dir)?;
        }
        Ok(())
    }

    /// Store `text` under `hash` unless an object with that hash already
    /// exists. Returns whether a new object was written. An existing object
    /// is never overwritten.
    pub fn put_if_absent(&self, hash: &str, text: &str) -> Result<bool> {
        if !is_valid_hash(hash) {
            return Err(ReadCacheErr::InvalidHash(hash.to_string()));
        }
        let target = self.object_path(hash);
        if target.exists() {
            return Ok(false);
        }
        self.ensure_layout()?;

        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let prefix = format!("put-{}-{millis}-", std::process::id());
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(self.tmp_dir())
            .map_err(ReadCacheErr::Io)?;
        tmp.write_all(text.as_bytes())?;
        tmp.flush()?;
        if let Err(err) = tmp.as_file().sync_all() {
            warn!("object store: fsync failed for {hash}: {err}");
        }

        match tmp.persist_noclobber(&target) {
            Ok(_) => Ok(true),
            // Another writer won the race; its content is ours by
            // construction, so drop the temp file and report not-written.
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(ReadCacheErr::Io(err.error)),
        }
    }

    /// Read an object back as strict UTF-8 text. Absence is `Ok(None)`, not
    /// an error.
    pub async fn load(&self, hash: &str) -> Result<Option<String>> {
        if !is_valid_hash(hash) {
            return Err(ReadCacheErr::InvalidHash(hash.to_string()));
        }
        let bytes = match tokio::fs::read(self.object_path(hash)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ReadCacheErr::Io(err)),
        };
        let text = String::from_utf8(bytes)
            .map_err(|err| ReadCacheErr::Io(std::io::Error::other(err)))?;
        Ok(Some(text))
    }

    /// Best-effort object count and total size. Any traversal error yields
    /// zero counts rather than failing the caller.
    pub fn stats(&self) -> StoreStats {
        let entries = match std::fs::read_dir(self.objects_dir()) {
            Ok(entries) => entries,
            Err(_) => return StoreStats::default(),
        };
        let mut stats = StoreStats::default();
        for entry in entries.flatten() {
            if !is_object_file_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_file() {
                stats.objects += 1;
                stats.bytes += meta.len();
            }
        }
        stats
    }

    /// Delete objects whose modification time predates
    /// `now_ms - max_age_ms`. Errors on individual files are swallowed.
    pub fn prune_older_than(&self, max_age_ms: u64, now_ms: u64) -> PruneOutcome {
        let cutoff_ms = now_ms.saturating_sub(max_age_ms);
        let entries = match std::fs::read_dir(self.objects_dir()) {
            Ok(entries) => entries,
            Err(_) => return PruneOutcome::default(),
        };
        let mut outcome = PruneOutcome::default();
        for entry in entries.flatten() {
            if !is_object_file_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            outcome.scanned += 1;
            let modified_ms = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|age| age.as_millis() as u64);
            let Some(modified_ms) = modified_ms else {
                continue;
            };
            if modified_ms < cutoff_ms {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => outcome.deleted += 1,
                    Err(err) => {
                        warn!("object store: failed to prune {:?}: {err}", entry.path());
                    }
                }
            }
        }
        outcome
    }
}

fn is_object_file_name(name: &str) -> bool {
    name.strip_prefix(OBJECT_PREFIX)
        .and_then(|rest| rest.strip_suffix(OBJECT_SUFFIX))
        .is_some_and(is_valid_hash)
}

/// On Unix, restrict store directories to the owning user.
#[cfg(unix)]
fn ensure_owner_only_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(dir)?;
    let mut perms = metadata.permissions();
    if perms.mode() & 0o777 != 0o700 {
        perms.set_mode(0o700);
        std::fs::set_permissions(dir, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_owner_only_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store() -> (TempDir, ObjectStore) {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let store = ObjectStore::new(dir.path().join("readcache"));
        (dir, store)
    }

    #[test]
    fn hashes_are_64_lowercase_hex() {
        let hash = hash_bytes(b"alpha\nbeta\ngamma");
        assert_eq!(hash.len(), 64);
        assert!(is_valid_hash(&hash));
        // Same input, same digest.
        assert_eq!(hash, hash_bytes(b"alpha\nbeta\ngamma"));
    }

    #[tokio::test]
    async fn put_is_idempotent_and_never_overwrites() {
        let (_dir, store) = store();
        let text = "alpha\nbeta\n";
        let hash = hash_bytes(text.as_bytes());

        assert_eq!(store.put_if_absent(&hash, text).ok(), Some(true));
        assert_eq!(store.put_if_absent(&hash, text).ok(), Some(false));
        assert_eq!(store.stats().objects, 1);
        assert_eq!(store.load(&hash).await.ok().flatten().as_deref(), Some(text));
    }

    #[tokio::test]
    async fn absent_objects_are_none_not_errors() {
        let (_dir, store) = store();
        let hash = hash_bytes(b"never stored");
        assert_eq!(store.load(&hash).await.ok().flatten(), None);
    }

    #[tokio::test]
    async fn invalid_hashes_are_rejected_before_touching_disk() {
        let (_dir, store) = store();
        let upper = "A".repeat(64);
        let short = "a".repeat(63);
        let nonhex = "g".repeat(64);
        for bad in ["", "zz", upper.as_str(), short.as_str(), nonhex.as_str()] {
            assert!(matches!(
                store.put_if_absent(bad, "text"),
                Err(ReadCacheErr::InvalidHash(_))
            ));
            assert!(matches!(
                store.load(bad).await,
                Err(ReadCacheErr::InvalidHash(_))
            ));
        }
    }

    #[test]
    fn prune_deletes_only_old_objects() {
        let (_dir, store) = store();
        let text = "to be pruned";
        let hash = hash_bytes(text.as_bytes());
        assert_eq!(store.put_if_absent(&hash, text).ok(), Some(true));

        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        // Young enough: survives.
        let outcome = store.prune_older_than(60_000, now_ms);
        assert_eq!(
            outcome,
            PruneOutcome {
                scanned: 1,
                deleted: 0
            }
        );

        // Pretend a month passed.
        let later = now_ms + 31 * 24 * 60 * 60 * 1000;
        let outcome = store.prune_older_than(30 * 24 * 60 * 60 * 1000, later);
        assert_eq!(
            outcome,
            PruneOutcome {
                scanned: 1,
                deleted: 1
            }
        );
        assert_eq!(store.stats().objects, 0);
    }

    #[test]
    fn stats_ignore_foreign_files() {
        let (_dir, store) = store();
        let hash = hash_bytes(b"content");
        assert_eq!(store.put_if_absent(&hash, "content").ok(), Some(true));
        std::fs::write(store.objects_dir().join("stray.txt"), "not an object")
            .unwrap_or_else(|err| panic!("write stray: {err}"));
        assert_eq!(store.stats().objects, 1);
    }
}
