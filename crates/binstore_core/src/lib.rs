//! Typed repository layer over a schemaless key/bin record store.
//!
//! Domain types implement [`Entity`] on top of a change-tracking
//! [`Record`]; a [`Repository`] maps them onto a [`StoreClient`]. The crate
//! ships [`SqliteStore`] as its store client and query engine.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod store;

pub use config::{load_config, ClientPolicy, ConfigError, LoggingConfig, StoreConfig};
pub use logging::{init_logging, logging_status, LogLevel, LoggingError};
pub use model::entity::{Entity, EntityDescriptor};
pub use model::record::{Record, Slot};
pub use model::value::{decode, encode, CodecError, FromValue, IntoValue, Value};
pub use repo::{ChangeKind, Cursor, RepoError, RepoResult, Repository};
pub use store::{
    Filter, IndexType, Key, QueryEngine, Qualifier, QualifierOp, SqliteStore, StoreClient,
    StoreError, StoreResult, WritePolicy,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
