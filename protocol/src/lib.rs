//! Wire types shared between the readcache runtime and the host agent.
//!
//! Everything in this crate is persisted into session entry streams, so the
//! serialized shapes are stable: records carry an explicit version field and
//! unknown entry kinds deserialize into catch-all variants instead of
//! failing the whole stream.

pub mod entries;
pub mod records;
pub mod scope;

pub use entries::EntryBody;
pub use entries::SessionEntry;
pub use records::CUSTOM_NAMESPACE;
pub use records::Invalidation;
pub use records::ReadMeta;
pub use records::ReadMode;
pub use scope::ScopeKey;
