use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReadCacheErr>;

#[derive(Error, Debug)]
pub enum ReadCacheErr {
    /// A user-supplied argument did not validate: a malformed range suffix
    /// on an existing file, a zero offset/limit, or an offset beyond the end
    /// of the file. Surfaced to the caller rather than degraded.
    #[error("invalid read request: {0}")]
    Validation(String),

    /// The tool was invoked without the host context it requires.
    #[error("the read tool requires a host-provided context")]
    MissingContext,

    /// The cooperative cancellation flag was set. Callers receive no
    /// partial result.
    #[error("aborted")]
    Interrupted,

    /// An object-store entry point was handed something that is not a
    /// 64-char lowercase hex digest.
    #[error("invalid object hash: {0}")]
    InvalidHash(String),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReadCacheErr {
    /// Whether this error must surface to the caller. Everything else is
    /// fail-open: the decision engine degrades to baseline content instead
    /// of letting the failure manifest as a missed file body.
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            ReadCacheErr::Validation(_) | ReadCacheErr::MissingContext | ReadCacheErr::Interrupted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_context_and_cancellation_surface() {
        assert!(ReadCacheErr::Validation("bad range".to_string()).is_surfaced());
        assert!(ReadCacheErr::MissingContext.is_surfaced());
        assert!(ReadCacheErr::Interrupted.is_surfaced());
        assert!(!ReadCacheErr::InvalidHash("zz".to_string()).is_surfaced());
        assert!(!ReadCacheErr::Io(io::Error::other("disk gone")).is_surfaced());
    }

    #[test]
    fn interrupted_uses_the_uniform_indicator() {
        assert_eq!(ReadCacheErr::Interrupted.to_string(), "aborted");
    }
}
