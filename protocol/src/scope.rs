//! Scope keys identify which part of a file a read covered.
//!
//! A scope is either the whole file (`full`) or an inclusive 1-based line
//! range (`r:<start>:<end>`). Trust is tracked independently per scope, so
//! the string forms double as map keys inside persisted records.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as DeError;

/// Sentinel string form of [`ScopeKey::Full`].
pub const FULL_SCOPE: &str = "full";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeKey {
    /// The request covered every line of the file as it stood.
    Full,
    /// An inclusive 1-based line range with `1 <= start <= end`.
    Range { start: u32, end: u32 },
}

impl ScopeKey {
    /// Build the canonical scope for a normalized `[start..=end]` selection
    /// of a file with `total_lines` lines. A range spanning the whole file
    /// collapses to [`ScopeKey::Full`].
    pub fn canonical(start: u32, end: u32, total_lines: u32) -> Self {
        if start == 1 && end == total_lines {
            ScopeKey::Full
        } else {
            ScopeKey::Range { start, end }
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ScopeKey::Full)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Full => f.write_str(FULL_SCOPE),
            ScopeKey::Range { start, end } => write!(f, "r:{start}:{end}"),
        }
    }
}

/// Error returned when a scope token does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseScopeKeyError(String);

impl fmt::Display for ParseScopeKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid scope key: `{}`", self.0)
    }
}

impl std::error::Error for ParseScopeKeyError {}

impl FromStr for ScopeKey {
    type Err = ParseScopeKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == FULL_SCOPE {
            return Ok(ScopeKey::Full);
        }
        let err = || ParseScopeKeyError(s.to_string());
        let rest = s.strip_prefix("r:").ok_or_else(err)?;
        let (start, end) = rest.split_once(':').ok_or_else(err)?;
        let start: u32 = start.parse().map_err(|_| err())?;
        let end: u32 = end.parse().map_err(|_| err())?;
        if start == 0 || end < start {
            return Err(err());
        }
        Ok(ScopeKey::Range { start, end })
    }
}

impl Serialize for ScopeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScopeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_string_forms() {
        assert_eq!(ScopeKey::Full.to_string(), "full");
        assert_eq!(
            ScopeKey::Range { start: 3, end: 17 }.to_string(),
            "r:3:17"
        );
        assert_eq!("full".parse::<ScopeKey>(), Ok(ScopeKey::Full));
        assert_eq!(
            "r:3:17".parse::<ScopeKey>(),
            Ok(ScopeKey::Range { start: 3, end: 17 })
        );
    }

    #[test]
    fn rejects_malformed_tokens() {
        for bad in ["", "r:", "r:0:5", "r:5:4", "r:1", "r:1:2:3", "R:1:2", "r:a:b", "fullish"] {
            assert!(bad.parse::<ScopeKey>().is_err(), "expected `{bad}` to fail");
        }
    }

    #[test]
    fn whole_file_range_collapses_to_full() {
        assert_eq!(ScopeKey::canonical(1, 40, 40), ScopeKey::Full);
        assert_eq!(
            ScopeKey::canonical(1, 39, 40),
            ScopeKey::Range { start: 1, end: 39 }
        );
        assert_eq!(
            ScopeKey::canonical(2, 40, 40),
            ScopeKey::Range { start: 2, end: 40 }
        );
    }

    #[test]
    fn serde_uses_string_forms() {
        let json = serde_json::to_string(&ScopeKey::Range { start: 1, end: 2 })
            .unwrap_or_default();
        assert_eq!(json, "\"r:1:2\"");
        let back: ScopeKey = serde_json::from_str(&json).unwrap_or(ScopeKey::Full);
        assert_eq!(back, ScopeKey::Range { start: 1, end: 2 });
    }
}
