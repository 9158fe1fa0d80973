//! Settings that govern the cache, loaded from the agent's `config.toml`.
//!
//! Everything here is optional: a missing or malformed config file yields
//! the defaults, with a warning rather than a failure, because the cache
//! must never keep the host from starting a session.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Default object-store retention used by the session-start sweep.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const CONFIG_TOML_FILE: &str = "config.toml";

/// Environment variable overriding the agent home directory (defaults to
/// `~/.pi`).
pub const PI_HOME_ENV_VAR: &str = "PI_HOME";

#[derive(Debug, Clone, PartialEq)]
pub struct ReadCacheConfig {
    /// When false the read override delegates straight to the baseline and
    /// attaches no metadata.
    pub enabled: bool,

    /// Age past which the session-start sweep deletes stored objects.
    pub retention: Duration,

    /// Additional sensitive-path patterns merged with the built-in set.
    pub extra_sensitive_patterns: Vec<String>,
}

impl Default for ReadCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention: DEFAULT_RETENTION,
            extra_sensitive_patterns: Vec::new(),
        }
    }
}

/// On-disk mirror of the `[readcache]` table.
#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    readcache: Option<ReadCacheTable>,
}

#[derive(Debug, Default, Deserialize)]
struct ReadCacheTable {
    enabled: Option<bool>,
    retention_days: Option<u64>,
    sensitive: Option<Vec<String>>,
}

/// Resolve the agent home directory: `$PI_HOME` when set, `~/.pi`
/// otherwise.
pub fn pi_home() -> std::io::Result<PathBuf> {
    if let Ok(home) = std::env::var(PI_HOME_ENV_VAR)
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }
    let mut dir = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not determine home directory",
        )
    })?;
    dir.push(".pi");
    Ok(dir)
}

impl ReadCacheConfig {
    /// Best-effort load from `<pi_home>/config.toml`. Any failure along the
    /// way falls back to defaults.
    pub fn load() -> Self {
        let path = match pi_home() {
            Ok(home) => home.join(CONFIG_TOML_FILE),
            Err(err) => {
                warn!("readcache config: {err}; using defaults");
                return Self::default();
            }
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!("readcache config: failed to read {}: {err}", path.display());
                return Self::default();
            }
        };
        Self::from_toml(&contents)
    }

    /// Parse the config document, keeping defaults for anything absent or
    /// malformed.
    pub fn from_toml(contents: &str) -> Self {
        let parsed: ConfigToml = match toml::from_str(contents) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("readcache config: failed to parse config.toml: {err}");
                return Self::default();
            }
        };
        let table = parsed.readcache.unwrap_or_default();
        let defaults = Self::default();
        Self {
            enabled: table.enabled.unwrap_or(defaults.enabled),
            retention: table
                .retention_days
                .map(|days| Duration::from_secs(days * 24 * 60 * 60))
                .unwrap_or(defaults.retention),
            extra_sensitive_patterns: table.sensitive.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_table_yields_defaults() {
        assert_eq!(ReadCacheConfig::from_toml(""), ReadCacheConfig::default());
        assert_eq!(
            ReadCacheConfig::from_toml("[other]\nkey = 1\n"),
            ReadCacheConfig::default()
        );
    }

    #[test]
    fn table_overrides_are_applied() {
        let config = ReadCacheConfig::from_toml(
            r#"
[readcache]
enabled = false
retention_days = 7
sensitive = ["*.sqlite"]
"#,
        );
        assert_eq!(
            config,
            ReadCacheConfig {
                enabled: false,
                retention: Duration::from_secs(7 * 24 * 60 * 60),
                extra_sensitive_patterns: vec!["*.sqlite".to_string()],
            }
        );
    }

    #[test]
    fn malformed_document_falls_back_to_defaults() {
        assert_eq!(
            ReadCacheConfig::from_toml("[readcache\nenabled ="),
            ReadCacheConfig::default()
        );
    }
}
