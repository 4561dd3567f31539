//! Typed repository over the store client.
//!
//! # Responsibility
//! - Bind an `Entity` type to a `(namespace, set)` location.
//! - Adapt raw store streams into typed, self-releasing cursors.
//!
//! # Invariants
//! - Repositories share the store handle via `Arc`; they hold no other state.
//! - Every cursor handed out releases its stream on all exit paths.

pub mod cursor;
pub mod entity_repo;

pub use cursor::Cursor;
pub use entity_repo::{ChangeKind, RepoError, RepoResult, Repository, REPLICATION_FACTOR};
