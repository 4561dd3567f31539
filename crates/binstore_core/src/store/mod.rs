//! Store client contracts and the SQLite-backed implementation.
//!
//! # Responsibility
//! - Define the primitive key/bin operations a repository needs
//!   (`StoreClient`) and the filtered streaming query surface
//!   (`QueryEngine`).
//! - Ship `SqliteStore`, one concrete client that implements both.
//!
//! # Invariants
//! - Records are addressed by `(namespace, set_name, user_key)`.
//! - Only `Value` kinds cross this boundary; domain types never do.
//! - A bin written with a null value is removed by the store.
//! - Every opened `RecordStream` must be closed exactly once.

use crate::db::DbError;
use crate::model::value::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod scan;
mod sqlite;

pub use scan::SqliteRecordStream;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Fully qualified record address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub namespace: String,
    pub set_name: String,
    pub user_key: String,
}

impl Key {
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            user_key: user_key.into(),
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.namespace, self.set_name, self.user_key)
    }
}

/// One named value on the write path; `None` clears the bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub name: String,
    pub value: Option<Value>,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Raw record as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRecord {
    pub bins: HashMap<String, Value>,
    pub generation: u32,
    pub expiration: u32,
}

/// Key plus record, as produced by scans and queries.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecord {
    pub key: Key,
    pub record: StoreRecord,
}

/// Existence semantics of a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Fails with `KeyExists` when the key is present.
    CreateOnly,
    /// Creates the record or merges transmitted bins into it.
    Upsert,
    /// Fails with `KeyNotFound` when the key is absent.
    UpdateOnly,
}

impl WritePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateOnly => "create_only",
            Self::Upsert => "upsert",
            Self::UpdateOnly => "update_only",
        }
    }
}

/// Store-side single-bin mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Append,
    Prepend,
    Add,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Add => "add",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub bin: String,
    pub value: Value,
}

impl Operation {
    pub fn new(kind: OperationKind, bin: impl Into<String>, value: Value) -> Self {
        Self {
            kind,
            bin: bin.into(),
            value,
        }
    }
}

/// Secondary index value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    String,
    Numeric,
}

impl IndexType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Numeric => "numeric",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "string" => Some(Self::String),
            "numeric" => Some(Self::Numeric),
            _ => None,
        }
    }
}

/// Index-backed query filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Equality on a string or integer bin.
    Equal { bin: String, value: Value },
    /// Inclusive integer range.
    Range { bin: String, begin: i64, end: i64 },
}

impl Filter {
    pub fn equal(bin: impl Into<String>, value: Value) -> Self {
        Self::Equal {
            bin: bin.into(),
            value,
        }
    }

    pub fn range(bin: impl Into<String>, begin: i64, end: i64) -> Self {
        Self::Range {
            bin: bin.into(),
            begin,
            end,
        }
    }

    pub fn bin(&self) -> &str {
        match self {
            Self::Equal { bin, .. } | Self::Range { bin, .. } => bin,
        }
    }

    /// Index type able to serve this filter.
    pub fn index_type(&self) -> Option<IndexType> {
        match self {
            Self::Equal {
                value: Value::Str(_),
                ..
            } => Some(IndexType::String),
            Self::Equal {
                value: Value::Int(_),
                ..
            }
            | Self::Range { .. } => Some(IndexType::Numeric),
            Self::Equal { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualifierOp {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    StartsWith,
    EndsWith,
    Contains,
}

/// Extra predicate evaluated without an index.
#[derive(Debug, Clone, PartialEq)]
pub struct Qualifier {
    pub bin: String,
    pub op: QualifierOp,
    pub value: Value,
}

impl Qualifier {
    pub fn new(bin: impl Into<String>, op: QualifierOp, value: Value) -> Self {
        Self {
            bin: bin.into(),
            op,
            value,
        }
    }
}

/// Primitive store operations addressed by key.
pub trait StoreClient: Send + Sync {
    /// Namespace used when a repository is built without one.
    fn default_namespace(&self) -> &str;

    /// Reads a record; `bin_names = None` reads every bin.
    fn get(&self, key: &Key, bin_names: Option<&[&str]>) -> StoreResult<Option<StoreRecord>>;

    fn exists(&self, key: &Key) -> StoreResult<bool>;

    /// Reads many keys; the result is positionally aligned with `keys`.
    fn get_batch(&self, keys: &[Key]) -> StoreResult<Vec<Option<StoreRecord>>>;

    fn put(&self, policy: WritePolicy, key: &Key, bins: &[Bin]) -> StoreResult<()>;

    /// Returns whether a record was removed.
    fn delete(&self, key: &Key) -> StoreResult<bool>;

    /// Applies all operations as one store-side unit and returns the
    /// resulting record (only `read_bins` when given).
    fn operate(
        &self,
        key: &Key,
        operations: &[Operation],
        read_bins: Option<&[&str]>,
    ) -> StoreResult<StoreRecord>;

    /// Streams every live record of a set.
    fn scan_all(&self, namespace: &str, set_name: &str) -> StoreResult<Box<dyn RecordStream>>;

    /// Builds a secondary index; the returned task reports completion.
    fn create_index(
        &self,
        namespace: &str,
        set_name: &str,
        index_name: &str,
        bin_name: &str,
        index_type: IndexType,
    ) -> StoreResult<Box<dyn IndexTask>>;

    fn drop_index(&self, namespace: &str, set_name: &str, index_name: &str) -> StoreResult<()>;

    /// Per-node object counts for one set, replicas included.
    fn node_object_counts(&self, namespace: &str, set_name: &str) -> StoreResult<Vec<u64>>;
}

/// Filtered streaming reads.
pub trait QueryEngine: Send + Sync {
    fn select(
        &self,
        namespace: &str,
        set_name: &str,
        filter: Option<&Filter>,
        qualifiers: &[Qualifier],
    ) -> StoreResult<Box<dyn RecordStream>>;
}

/// Pull-based stream over a server-side cursor.
pub trait RecordStream: Send {
    fn next_record(&mut self) -> StoreResult<Option<KeyRecord>>;

    /// Releases the server-side cursor. Idempotent.
    fn close(&mut self);
}

/// Handle on an asynchronous index build.
pub trait IndexTask: Send {
    fn is_done(&self) -> StoreResult<bool>;

    /// Blocks until the build finished.
    fn wait_till_complete(&self) -> StoreResult<()> {
        while !self.is_done()? {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        Ok(())
    }
}

/// Backend failure on any store call.
#[derive(Debug)]
pub enum StoreError {
    KeyExists(Key),
    KeyNotFound(Key),
    BinTypeMismatch {
        bin: String,
        expected: &'static str,
        found: &'static str,
    },
    IndexExists(String),
    IndexNotFound {
        bin: String,
        index_type: &'static str,
    },
    InvalidArgument(String),
    InvalidData(String),
    Timeout {
        attempts: u32,
    },
    Db(DbError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyExists(key) => write!(f, "key already exists: {key}"),
            Self::KeyNotFound(key) => write!(f, "key not found: {key}"),
            Self::BinTypeMismatch {
                bin,
                expected,
                found,
            } => write!(f, "bin `{bin}` holds {found}, operation needs {expected}"),
            Self::IndexExists(name) => write!(f, "index already exists: {name}"),
            Self::IndexNotFound { bin, index_type } => {
                write!(f, "no {index_type} index on bin `{bin}`")
            }
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
            Self::Timeout { attempts } => {
                write!(f, "store busy; gave up after {attempts} attempts")
            }
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
