//! SQLite-backed store client and query engine.
//!
//! # Responsibility
//! - Persist wide, schemaless records as one `records` row plus one `bins`
//!   row per bin.
//! - Enforce write existence policies, generation counting and TTL.
//! - Run store-side atomic bin operations inside one immediate transaction.
//!
//! # Invariants
//! - Generation is 1 after create and increments on every write/operate.
//! - Expired records are invisible to every read path.
//! - Busy/locked failures are retried per `ClientPolicy`, then reported as
//!   `StoreError::Timeout`.
//! - All access goes through one connection guarded by a mutex, so the store
//!   is `Send + Sync` and shared via `Arc`.

use super::scan::SqliteRecordStream;
use super::{
    Bin, Filter, IndexTask, IndexType, Key, Operation, OperationKind, QueryEngine, Qualifier,
    RecordStream, StoreClient, StoreError, StoreRecord, StoreResult, WritePolicy,
};
use crate::config::{ClientPolicy, StoreConfig};
use crate::db::{open_db, open_db_in_memory};
use crate::model::record::store_epoch_now_secs;
use crate::model::value::Value;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

static INDEX_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,63}$").expect("valid index name regex"));

/// State shared between the store and its open record streams.
pub(super) struct Shared {
    conn: Mutex<Connection>,
    open_cursors: Mutex<HashSet<Uuid>>,
    policy: ClientPolicy,
}

impl Shared {
    /// Runs `op` on the connection, retrying busy failures per policy.
    pub(super) fn with_conn<T>(
        &self,
        op: &str,
        mut f: impl FnMut(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut attempt: u32 = 0;
        loop {
            let result = {
                let mut conn = self.conn.lock();
                f(&mut *conn)
            };
            match result {
                Err(StoreError::Db(ref err)) if err.is_busy() => {
                    if attempt >= self.policy.max_retries {
                        warn!(
                            "event=store_call module=store status=timeout op={} attempts={}",
                            op,
                            attempt + 1
                        );
                        return Err(StoreError::Timeout {
                            attempts: attempt + 1,
                        });
                    }
                    attempt += 1;
                    std::thread::sleep(self.policy.retry_backoff());
                }
                other => return other,
            }
        }
    }

    pub(super) fn register_cursor(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.open_cursors.lock().insert(id);
        id
    }

    pub(super) fn release_cursor(&self, id: &Uuid) -> bool {
        self.open_cursors.lock().remove(id)
    }

    fn expiration_stamp(&self) -> u32 {
        match self.policy.default_ttl_secs {
            0 => 0,
            ttl => (store_epoch_now_secs() + i64::from(ttl)).clamp(1, i64::from(u32::MAX)) as u32,
        }
    }
}

/// Store client over a single SQLite database.
pub struct SqliteStore {
    shared: Arc<Shared>,
    default_namespace: String,
}

impl SqliteStore {
    /// Opens the database named by `config.database_path`, or an in-memory
    /// database when no path is configured.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|err| StoreError::InvalidArgument(err.to_string()))?;

        let timeout = config.client_policy.timeout();
        let conn = match &config.database_path {
            Some(path) => open_db(path, timeout)?,
            None => open_db_in_memory(timeout)?,
        };

        info!(
            "event=store_open module=store status=ok namespace={} mode={}",
            config.default_namespace,
            if config.database_path.is_some() {
                "file"
            } else {
                "memory"
            }
        );

        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                open_cursors: Mutex::new(HashSet::new()),
                policy: config.client_policy.clone(),
            }),
            default_namespace: config.default_namespace.clone(),
        })
    }

    /// In-memory store with default policy.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(&StoreConfig::default())
    }

    pub fn policy(&self) -> &ClientPolicy {
        &self.shared.policy
    }

    /// Number of scan/query cursors not yet released.
    pub fn open_cursor_count(&self) -> usize {
        self.shared.open_cursors.lock().len()
    }

    fn open_stream(
        &self,
        namespace: &str,
        set_name: &str,
        filter: Option<Filter>,
        qualifiers: Vec<Qualifier>,
    ) -> Box<dyn RecordStream> {
        Box::new(SqliteRecordStream::open(
            Arc::clone(&self.shared),
            namespace,
            set_name,
            filter,
            qualifiers,
        ))
    }
}

impl StoreClient for SqliteStore {
    fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    fn get(&self, key: &Key, bin_names: Option<&[&str]>) -> StoreResult<Option<StoreRecord>> {
        self.shared
            .with_conn("get", |conn| load_record(conn, key, bin_names))
    }

    fn exists(&self, key: &Key) -> StoreResult<bool> {
        self.shared
            .with_conn("exists", |conn| Ok(live_meta(conn, key)?.is_some()))
    }

    fn get_batch(&self, keys: &[Key]) -> StoreResult<Vec<Option<StoreRecord>>> {
        self.shared.with_conn("get_batch", |conn| {
            keys.iter()
                .map(|key| load_record(conn, key, None))
                .collect()
        })
    }

    fn put(&self, policy: WritePolicy, key: &Key, bins: &[Bin]) -> StoreResult<()> {
        for bin in bins {
            if let Some(value) = &bin.value {
                check_storable(&bin.name, value)?;
            }
        }
        let expiration = self.shared.expiration_stamp();
        let dropped = self.shared.with_conn("put", |conn| {
            let tx = Transaction::new(conn, TransactionBehavior::Immediate)?;
            let existed = purge_expired_and_check(&tx, key)?;

            match (policy, existed) {
                (WritePolicy::CreateOnly, true) => return Err(StoreError::KeyExists(key.clone())),
                (WritePolicy::UpdateOnly, false) => {
                    return Err(StoreError::KeyNotFound(key.clone()))
                }
                _ => {}
            }

            touch_record(&tx, key, existed, expiration)?;
            for bin in bins {
                match &bin.value {
                    Some(value) => write_bin(&tx, key, &bin.name, value)?,
                    None => remove_bin(&tx, key, &bin.name)?,
                }
            }
            let dropped = drop_if_binless(&tx, key)?;
            tx.commit()?;
            Ok(dropped)
        })?;
        debug!(
            "event=store_put module=store status=ok policy={} key={} bins={} dropped={}",
            policy.as_str(),
            key,
            bins.len(),
            dropped
        );
        Ok(())
    }

    fn delete(&self, key: &Key) -> StoreResult<bool> {
        self.shared.with_conn("delete", |conn| {
            let changed = conn.execute(
                "DELETE FROM records WHERE namespace = ?1 AND set_name = ?2 AND user_key = ?3;",
                params![key.namespace, key.set_name, key.user_key],
            )?;
            Ok(changed > 0)
        })
    }

    fn operate(
        &self,
        key: &Key,
        operations: &[Operation],
        read_bins: Option<&[&str]>,
    ) -> StoreResult<StoreRecord> {
        let expiration = self.shared.expiration_stamp();
        let record = self.shared.with_conn("operate", |conn| {
            let tx = Transaction::new(conn, TransactionBehavior::Immediate)?;
            let existed = purge_expired_and_check(&tx, key)?;
            touch_record(&tx, key, existed, expiration)?;

            for operation in operations {
                let current = load_bin(&tx, key, &operation.bin)?;
                let next = apply_operation(operation, current)?;
                write_bin(&tx, key, &operation.bin, &next)?;
            }

            let record = load_record(&tx, key, read_bins)?.ok_or_else(|| {
                StoreError::InvalidData(format!("record {key} vanished during operate"))
            })?;
            tx.commit()?;
            Ok(record)
        })?;

        debug!(
            "event=store_operate module=store status=ok key={} ops={} generation={}",
            key,
            operations.len(),
            record.generation
        );
        Ok(record)
    }

    fn scan_all(&self, namespace: &str, set_name: &str) -> StoreResult<Box<dyn RecordStream>> {
        Ok(self.open_stream(namespace, set_name, None, Vec::new()))
    }

    fn create_index(
        &self,
        namespace: &str,
        set_name: &str,
        index_name: &str,
        bin_name: &str,
        index_type: IndexType,
    ) -> StoreResult<Box<dyn IndexTask>> {
        if !INDEX_NAME_RE.is_match(index_name) {
            return Err(StoreError::InvalidArgument(format!(
                "invalid index name `{index_name}`"
            )));
        }

        self.shared.with_conn("create_index", |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO secondary_indexes (
                    namespace, set_name, index_name, bin_name, index_type
                 ) VALUES (?1, ?2, ?3, ?4, ?5);",
                params![namespace, set_name, index_name, bin_name, index_type.as_str()],
            )?;
            if inserted == 0 {
                return Err(StoreError::IndexExists(index_name.to_string()));
            }
            Ok(())
        })?;

        info!(
            "event=index_create module=store status=ok ns={} set={} index={} bin={} type={}",
            namespace,
            set_name,
            index_name,
            bin_name,
            index_type.as_str()
        );
        Ok(Box::new(SqliteIndexTask {
            shared: Arc::clone(&self.shared),
            namespace: namespace.to_string(),
            index_name: index_name.to_string(),
        }))
    }

    fn drop_index(&self, namespace: &str, set_name: &str, index_name: &str) -> StoreResult<()> {
        let removed = self.shared.with_conn("drop_index", |conn| {
            Ok(conn.execute(
                "DELETE FROM secondary_indexes
                 WHERE namespace = ?1 AND set_name = ?2 AND index_name = ?3;",
                params![namespace, set_name, index_name],
            )?)
        })?;
        info!(
            "event=index_drop module=store status=ok ns={} set={} index={} removed={}",
            namespace, set_name, index_name, removed
        );
        Ok(())
    }

    fn node_object_counts(&self, namespace: &str, set_name: &str) -> StoreResult<Vec<u64>> {
        let now = store_epoch_now_secs();
        let count = self.shared.with_conn("count", |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM records
                 WHERE namespace = ?1 AND set_name = ?2
                   AND (expiration = 0 OR expiration > ?3);",
                params![namespace, set_name, now],
                |row| row.get::<_, i64>(0),
            )?)
        })?;
        Ok(vec![count.max(0) as u64])
    }
}

impl QueryEngine for SqliteStore {
    fn select(
        &self,
        namespace: &str,
        set_name: &str,
        filter: Option<&Filter>,
        qualifiers: &[Qualifier],
    ) -> StoreResult<Box<dyn RecordStream>> {
        if let Some(filter) = filter {
            let wanted = filter.index_type().ok_or_else(|| {
                StoreError::InvalidArgument(format!(
                    "filter on `{}` needs a string or integer value",
                    filter.bin()
                ))
            })?;
            let indexed = self.shared.with_conn("select", |conn| {
                index_exists(conn, namespace, set_name, filter.bin(), wanted)
            })?;
            if !indexed {
                return Err(StoreError::IndexNotFound {
                    bin: filter.bin().to_string(),
                    index_type: wanted.as_str(),
                });
            }
        }

        Ok(self.open_stream(
            namespace,
            set_name,
            filter.cloned(),
            qualifiers.to_vec(),
        ))
    }
}

struct SqliteIndexTask {
    shared: Arc<Shared>,
    namespace: String,
    index_name: String,
}

impl IndexTask for SqliteIndexTask {
    fn is_done(&self) -> StoreResult<bool> {
        self.shared.with_conn("index_status", |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM secondary_indexes WHERE namespace = ?1 AND index_name = ?2;",
                    params![self.namespace, self.index_name],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

fn index_exists(
    conn: &Connection,
    namespace: &str,
    set_name: &str,
    bin_name: &str,
    index_type: IndexType,
) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM secondary_indexes
             WHERE namespace = ?1 AND set_name = ?2 AND bin_name = ?3 AND index_type = ?4
             LIMIT 1;",
            params![namespace, set_name, bin_name, index_type.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Generation and expiration of a live record.
pub(super) fn live_meta(conn: &Connection, key: &Key) -> StoreResult<Option<(u32, u32)>> {
    let now = store_epoch_now_secs();
    let meta = conn
        .query_row(
            "SELECT generation, expiration FROM records
             WHERE namespace = ?1 AND set_name = ?2 AND user_key = ?3
               AND (expiration = 0 OR expiration > ?4);",
            params![key.namespace, key.set_name, key.user_key, now],
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)),
        )
        .optional()?;
    Ok(meta)
}

pub(super) fn load_record(
    conn: &Connection,
    key: &Key,
    bin_names: Option<&[&str]>,
) -> StoreResult<Option<StoreRecord>> {
    let Some((generation, expiration)) = live_meta(conn, key)? else {
        return Ok(None);
    };

    let mut stmt = conn.prepare_cached(
        "SELECT name, kind, int_value, real_value, text_value FROM bins
         WHERE namespace = ?1 AND set_name = ?2 AND user_key = ?3;",
    )?;
    let mut rows = stmt.query(params![key.namespace, key.set_name, key.user_key])?;
    let mut bins = HashMap::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        if let Some(wanted) = bin_names {
            if !wanted.contains(&name.as_str()) {
                continue;
            }
        }
        let value = parse_bin_row(
            &name,
            &row.get::<_, String>(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        )?;
        bins.insert(name, value);
    }

    Ok(Some(StoreRecord {
        bins,
        generation,
        expiration,
    }))
}

fn load_bin(conn: &Connection, key: &Key, name: &str) -> StoreResult<Option<Value>> {
    let row = conn
        .query_row(
            "SELECT kind, int_value, real_value, text_value FROM bins
             WHERE namespace = ?1 AND set_name = ?2 AND user_key = ?3 AND name = ?4;",
            params![key.namespace, key.set_name, key.user_key, name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(kind, int_value, real_value, text_value)| {
        parse_bin_row(name, &kind, int_value, real_value, text_value)
    })
    .transpose()
}

/// Deletes an expired row so create semantics see it as absent; returns
/// whether a live record exists.
fn purge_expired_and_check(tx: &Transaction<'_>, key: &Key) -> StoreResult<bool> {
    let now = store_epoch_now_secs();
    tx.execute(
        "DELETE FROM records
         WHERE namespace = ?1 AND set_name = ?2 AND user_key = ?3
           AND expiration != 0 AND expiration <= ?4;",
        params![key.namespace, key.set_name, key.user_key, now],
    )?;
    Ok(live_meta(tx, key)?.is_some())
}

fn touch_record(
    tx: &Transaction<'_>,
    key: &Key,
    existed: bool,
    expiration: u32,
) -> StoreResult<()> {
    if existed {
        tx.execute(
            "UPDATE records SET generation = generation + 1, expiration = ?4
             WHERE namespace = ?1 AND set_name = ?2 AND user_key = ?3;",
            params![key.namespace, key.set_name, key.user_key, expiration],
        )?;
    } else {
        tx.execute(
            "INSERT INTO records (namespace, set_name, user_key, generation, expiration)
             VALUES (?1, ?2, ?3, 1, ?4);",
            params![key.namespace, key.set_name, key.user_key, expiration],
        )?;
    }
    Ok(())
}

fn write_bin(tx: &Transaction<'_>, key: &Key, name: &str, value: &Value) -> StoreResult<()> {
    let (int_value, real_value, text_value) = bin_columns(value)?;
    tx.execute(
        "INSERT OR REPLACE INTO bins (
            namespace, set_name, user_key, name, kind, int_value, real_value, text_value
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        params![
            key.namespace,
            key.set_name,
            key.user_key,
            name,
            value.kind(),
            int_value,
            real_value,
            text_value,
        ],
    )?;
    Ok(())
}

/// Deletes the record row once its last bin is gone.
fn drop_if_binless(tx: &Transaction<'_>, key: &Key) -> StoreResult<bool> {
    let removed = tx.execute(
        "DELETE FROM records
         WHERE namespace = ?1 AND set_name = ?2 AND user_key = ?3
           AND NOT EXISTS (
               SELECT 1 FROM bins
               WHERE bins.namespace = records.namespace
                 AND bins.set_name = records.set_name
                 AND bins.user_key = records.user_key
           );",
        params![key.namespace, key.set_name, key.user_key],
    )?;
    Ok(removed > 0)
}

/// SQLite turns NaN into NULL and JSON has no infinities, so only finite
/// doubles can be written back out unchanged.
fn check_storable(bin: &str, value: &Value) -> StoreResult<()> {
    match value {
        Value::Double(raw) if !raw.is_finite() => Err(StoreError::InvalidArgument(format!(
            "bin `{bin}` holds non-finite double {raw}"
        ))),
        Value::List(items) => items.iter().try_for_each(|item| check_storable(bin, item)),
        Value::Map(entries) => entries
            .values()
            .try_for_each(|item| check_storable(bin, item)),
        _ => Ok(()),
    }
}

fn remove_bin(tx: &Transaction<'_>, key: &Key, name: &str) -> StoreResult<()> {
    tx.execute(
        "DELETE FROM bins WHERE namespace = ?1 AND set_name = ?2 AND user_key = ?3 AND name = ?4;",
        params![key.namespace, key.set_name, key.user_key, name],
    )?;
    Ok(())
}

type BinColumns = (Option<i64>, Option<f64>, Option<String>);

fn bin_columns(value: &Value) -> StoreResult<BinColumns> {
    Ok(match value {
        Value::Int(raw) => (Some(*raw), None, None),
        Value::Double(raw) => (None, Some(*raw), None),
        Value::Str(raw) => (None, None, Some(raw.clone())),
        Value::List(_) | Value::Map(_) => {
            let json = serde_json::to_string(value).map_err(|err| {
                StoreError::InvalidData(format!("cannot encode {} bin: {err}", value.kind()))
            })?;
            (None, None, Some(json))
        }
    })
}

pub(super) fn parse_bin_row(
    name: &str,
    kind: &str,
    int_value: Option<i64>,
    real_value: Option<f64>,
    text_value: Option<String>,
) -> StoreResult<Value> {
    let missing = || StoreError::InvalidData(format!("bin `{name}` of kind `{kind}` has no value"));
    match kind {
        "int" => int_value.map(Value::Int).ok_or_else(missing),
        "double" => real_value.map(Value::Double).ok_or_else(missing),
        "string" => text_value.map(Value::Str).ok_or_else(missing),
        "list" | "map" => {
            let json = text_value.ok_or_else(missing)?;
            serde_json::from_str::<Value>(&json).map_err(|err| {
                StoreError::InvalidData(format!("bin `{name}` holds invalid {kind} json: {err}"))
            })
        }
        other => Err(StoreError::InvalidData(format!(
            "bin `{name}` has unknown kind `{other}`"
        ))),
    }
}

fn apply_operation(operation: &Operation, current: Option<Value>) -> StoreResult<Value> {
    let mismatch = |expected: &'static str, found: &Value| StoreError::BinTypeMismatch {
        bin: operation.bin.clone(),
        expected,
        found: found.kind(),
    };

    match operation.kind {
        OperationKind::Add => {
            let delta = operation
                .value
                .as_int()
                .ok_or_else(|| mismatch("int", &operation.value))?;
            match current {
                None => Ok(Value::Int(delta)),
                Some(Value::Int(base)) => base.checked_add(delta).map(Value::Int).ok_or_else(|| {
                    StoreError::InvalidArgument(format!(
                        "adding {delta} to bin `{}` overflows",
                        operation.bin
                    ))
                }),
                Some(other) => Err(mismatch("int", &other)),
            }
        }
        OperationKind::Append | OperationKind::Prepend => {
            let operand = operation
                .value
                .as_str()
                .ok_or_else(|| mismatch("string", &operation.value))?;
            match current {
                None => Ok(Value::Str(operand.to_string())),
                Some(Value::Str(base)) => Ok(Value::Str(match operation.kind {
                    OperationKind::Prepend => format!("{operand}{base}"),
                    _ => format!("{base}{operand}"),
                })),
                Some(other) => Err(mismatch("string", &other)),
            }
        }
    }
}
