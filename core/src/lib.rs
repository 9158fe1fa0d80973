//! Root of the `readcache-core` library.
//!
//! The correctness core of the read-cache extension: replaying per-scope
//! trust from the active session branch, deciding per read whether a
//! marker or diff can stand in for the full bytes, and durably storing
//! hashed snapshots so diffs survive restarts.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output goes through the host or the tracing stack.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod baseline;
pub mod commands;
pub mod config;
pub mod decision;
pub mod diff;
pub mod error;
pub mod knowledge;
pub mod object_store;
pub mod overlay;
pub mod replay;
pub mod runtime;
pub mod session;
mod text;
pub mod tools;

pub use config::ReadCacheConfig;
pub use decision::CancelFlag;
pub use decision::ReadOutcome;
pub use decision::ReadToolArgs;
pub use decision::handle_read;
pub use error::ReadCacheErr;
pub use error::Result;
pub use object_store::ObjectStore;
pub use runtime::ReadCacheRuntime;
pub use session::SessionLog;
pub use session::SessionView;
