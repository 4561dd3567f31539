//! Generic entity repository bound to one `(namespace, set)` location.
//!
//! # Responsibility
//! - Map entity writes onto store puts with the matching existence policy.
//! - Provide point reads, batch reads, scans, filtered queries, counts,
//!   index admin and store-side atomic bin operations.
//!
//! # Invariants
//! - Read-path absence returns `None`/`false`, never an error.
//! - Write/operate failures are logged and returned unchanged inside
//!   `RepoError::Store`.
//! - Missing arguments are rejected before any store call.
//! - Batch helpers stop at the first failure; earlier elements stay written.

use crate::model::entity::Entity;
use crate::model::value::{encode, CodecError, FromValue, IntoValue, Value};
use crate::repo::cursor::{materialize, Cursor};
use crate::store::{
    Bin, Filter, IndexType, Key, Operation, OperationKind, QueryEngine, Qualifier, StoreClient,
    StoreError, WritePolicy,
};
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

/// Stored copies per record on a multi-node cluster.
pub const REPLICATION_FACTOR: u64 = 2;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    InvalidArgument(String),
    Store(StoreError),
    Codec(CodecError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidArgument(_) => None,
            Self::Store(err) => Some(err),
            Self::Codec(err) => Some(err),
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<CodecError> for RepoError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

/// Write intent of `change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Save,
    Update,
}

impl ChangeKind {
    pub fn policy(self) -> WritePolicy {
        match self {
            Self::Insert => WritePolicy::CreateOnly,
            Self::Save => WritePolicy::Upsert,
            Self::Update => WritePolicy::UpdateOnly,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Save => "save",
            Self::Update => "update",
        }
    }
}

/// Typed access to one set of `E` records.
pub struct Repository<E, S> {
    client: Arc<S>,
    namespace: String,
    set_name: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E, S> Repository<E, S>
where
    E: Entity,
    S: StoreClient + QueryEngine,
{
    /// Repository at the client's default namespace and the type's own name.
    pub fn new(client: Arc<S>) -> RepoResult<Self> {
        Self::with_location(client, "", "")
    }

    /// Blank `namespace`/`set_name` fall back to the client default and the
    /// type name respectively.
    pub fn with_location(client: Arc<S>, namespace: &str, set_name: &str) -> RepoResult<Self> {
        let descriptor = E::descriptor();
        if descriptor.type_name.trim().is_empty() {
            return Err(RepoError::InvalidArgument(
                "entity descriptor has no type name".to_string(),
            ));
        }
        if descriptor.key_field.trim().is_empty() {
            return Err(RepoError::InvalidArgument(format!(
                "entity `{}` declares no key field",
                descriptor.type_name
            )));
        }

        let namespace = match namespace.trim() {
            "" => client.default_namespace().to_string(),
            explicit => explicit.to_string(),
        };
        let set_name = match set_name.trim() {
            "" => descriptor.type_name.to_string(),
            explicit => explicit.to_string(),
        };

        debug!(
            "event=repo_bind module=repo status=ok entity={} ns={} set={}",
            descriptor.type_name, namespace, set_name
        );
        Ok(Self {
            client,
            namespace,
            set_name,
            _entity: PhantomData,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    pub fn client(&self) -> &Arc<S> {
        &self.client
    }

    fn key(&self, user_key: &str) -> Key {
        Key::new(self.namespace.as_str(), self.set_name.as_str(), user_key)
    }

    fn entity_key(&self, entity: &E) -> RepoResult<Key> {
        let field = entity.key_field_name();
        match entity.record().get(field) {
            Some(Value::Str(value)) if !value.trim().is_empty() => Ok(self.key(value)),
            Some(other) => Err(RepoError::InvalidArgument(format!(
                "key field `{field}` must hold a non-empty string, found {}",
                other.kind()
            ))),
            None => Err(RepoError::InvalidArgument(format!(
                "key field `{field}` is not set"
            ))),
        }
    }

    fn write_failed(&self, op: &str, key: &Key, err: StoreError) -> RepoError {
        error!(
            "event=store_write module=repo status=error op={} ns={} set={} key={} error={}",
            op, self.namespace, self.set_name, key.user_key, err
        );
        RepoError::Store(err)
    }

    /// Write primitive behind `insert`, `save` and `update`.
    ///
    /// `Update` on a record that came from the store sends only its dirty
    /// bins; every other case sends all present bins, nulls included.
    pub fn change(&self, kind: ChangeKind, entity: &E) -> RepoResult<()> {
        let key = self.entity_key(entity)?;
        let record = entity.record();
        let fields = record.fields();

        let mut selected: Vec<&str> = if kind == ChangeKind::Update && record.generation() > 0 {
            record.dirty_fields().iter().map(String::as_str).collect()
        } else {
            fields.keys().map(String::as_str).collect()
        };
        selected.sort_unstable();

        let bins: Vec<Bin> = selected
            .into_iter()
            .filter_map(|name| fields.get(name).map(|slot| Bin::new(name, slot.clone())))
            .collect();

        self.client
            .put(kind.policy(), &key, &bins)
            .map_err(|err| self.write_failed(kind.as_str(), &key, err))?;

        debug!(
            "event=store_write module=repo status=ok op={} ns={} set={} key={} bins={}",
            kind.as_str(),
            self.namespace,
            self.set_name,
            key.user_key,
            bins.len()
        );
        Ok(())
    }

    /// Creates the record; fails when the key already exists.
    pub fn insert(&self, entity: &E) -> RepoResult<()> {
        self.change(ChangeKind::Insert, entity)
    }

    /// Creates the record or merges the transmitted bins into it.
    pub fn save(&self, entity: &E) -> RepoResult<()> {
        self.change(ChangeKind::Save, entity)
    }

    /// Updates an existing record; fails when the key is absent.
    pub fn update(&self, entity: &E) -> RepoResult<()> {
        self.change(ChangeKind::Update, entity)
    }

    /// Saves each entity in order; the first failure stops the loop.
    pub fn insert_all<'a, I>(&self, entities: I) -> RepoResult<usize>
    where
        I: IntoIterator<Item = &'a E>,
        E: 'a,
    {
        let mut written = 0;
        for entity in entities {
            self.save(entity)?;
            written += 1;
        }
        Ok(written)
    }

    /// Reads one bin without building an entity.
    pub fn get_field(&self, key: &str, field_name: &str) -> RepoResult<Option<Value>> {
        if field_name.trim().is_empty() {
            return Err(RepoError::InvalidArgument(
                "field name cannot be empty".to_string(),
            ));
        }
        if key.trim().is_empty() {
            return Ok(None);
        }

        let record = self.client.get(&self.key(key), Some(&[field_name][..]))?;
        Ok(record.and_then(|mut record| record.bins.remove(field_name)))
    }

    /// Reads one bin and decodes it.
    pub fn get_field_as<T: FromValue>(&self, key: &str, field_name: &str) -> RepoResult<Option<T>> {
        match self.get_field(key, field_name)? {
            Some(value) => Ok(Some(T::from_value(&value)?)),
            None => Ok(None),
        }
    }

    /// Reads several bins; every requested name is present in the result,
    /// `None` where the bin is unset.
    pub fn get_fields(
        &self,
        key: &str,
        field_names: &[&str],
    ) -> RepoResult<Option<BTreeMap<String, Option<Value>>>> {
        if field_names.is_empty() || field_names.iter().any(|name| name.trim().is_empty()) {
            return Err(RepoError::InvalidArgument(
                "field names cannot be empty".to_string(),
            ));
        }
        if key.trim().is_empty() {
            return Ok(None);
        }

        let Some(mut record) = self.client.get(&self.key(key), Some(field_names))? else {
            return Ok(None);
        };
        Ok(Some(
            field_names
                .iter()
                .map(|name| (name.to_string(), record.bins.remove(*name)))
                .collect(),
        ))
    }

    pub fn find_one(&self, key: &str) -> RepoResult<Option<E>> {
        if key.trim().is_empty() {
            return Ok(None);
        }
        Ok(self.client.get(&self.key(key), None)?.map(materialize::<E>))
    }

    pub fn exists(&self, key: &str) -> RepoResult<bool> {
        if key.trim().is_empty() {
            return Ok(false);
        }
        Ok(self.client.exists(&self.key(key))?)
    }

    /// Full scan of the set.
    pub fn find_all(&self) -> RepoResult<Cursor<E>> {
        let stream = self.client.scan_all(&self.namespace, &self.set_name)?;
        Ok(Cursor::new(stream))
    }

    /// Index-backed query with optional extra predicates.
    pub fn find_all_matching(
        &self,
        filter: Option<&Filter>,
        qualifiers: &[Qualifier],
    ) -> RepoResult<Cursor<E>> {
        let stream = self
            .client
            .select(&self.namespace, &self.set_name, filter, qualifiers)?;
        Ok(Cursor::new(stream))
    }

    /// Batch point lookup. Unresolved keys are omitted; `None` means no keys
    /// were requested.
    pub fn find_all_by_keys<K: AsRef<str>>(&self, keys: &[K]) -> RepoResult<Option<Vec<E>>> {
        if keys.is_empty() {
            return Ok(None);
        }

        let store_keys: Vec<Key> = keys
            .iter()
            .map(AsRef::as_ref)
            .filter(|key| !key.trim().is_empty())
            .map(|key| self.key(key))
            .collect();
        if store_keys.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let records = self.client.get_batch(&store_keys)?;
        Ok(Some(
            records
                .into_iter()
                .flatten()
                .map(materialize::<E>)
                .collect(),
        ))
    }

    /// Approximate record count. Not transactionally consistent.
    pub fn count(&self) -> RepoResult<u64> {
        let per_node = self
            .client
            .node_object_counts(&self.namespace, &self.set_name)?;
        let total: u64 = per_node.iter().sum();
        Ok(if per_node.len() > 1 {
            total / REPLICATION_FACTOR
        } else {
            total
        })
    }

    /// Builds a secondary index and waits for it to be usable.
    pub fn create_index(
        &self,
        index_name: &str,
        field_name: &str,
        index_type: IndexType,
    ) -> RepoResult<()> {
        if index_name.trim().is_empty() {
            return Err(RepoError::InvalidArgument(
                "index name cannot be empty".to_string(),
            ));
        }
        if field_name.trim().is_empty() {
            return Err(RepoError::InvalidArgument(
                "field name cannot be empty".to_string(),
            ));
        }

        let task = self.client.create_index(
            &self.namespace,
            &self.set_name,
            index_name,
            field_name,
            index_type,
        )?;
        task.wait_till_complete()?;
        info!(
            "event=index_ready module=repo status=ok ns={} set={} index={}",
            self.namespace, self.set_name, index_name
        );
        Ok(())
    }

    pub fn drop_index(&self, index_name: &str) -> RepoResult<()> {
        if index_name.trim().is_empty() {
            return Err(RepoError::InvalidArgument(
                "index name cannot be empty".to_string(),
            ));
        }
        self.client
            .drop_index(&self.namespace, &self.set_name, index_name)?;
        Ok(())
    }

    pub fn prepend<T: IntoValue>(&self, entity: &E, field_name: &str, value: T) -> RepoResult<E> {
        self.operate(entity, OperationKind::Prepend, [(field_name, encode(value))])
    }

    pub fn append<T: IntoValue>(&self, entity: &E, field_name: &str, value: T) -> RepoResult<E> {
        self.operate(entity, OperationKind::Append, [(field_name, encode(value))])
    }

    /// Atomic integer increment.
    pub fn add<T: IntoValue>(&self, entity: &E, field_name: &str, value: T) -> RepoResult<E> {
        self.operate(entity, OperationKind::Add, [(field_name, encode(value))])
    }

    /// Increments one bin by key and returns its new value. A missing
    /// record or bin starts from zero.
    pub fn add_by_key(&self, key: &str, field_name: &str, delta: i64) -> RepoResult<i64> {
        if key.trim().is_empty() {
            return Err(RepoError::InvalidArgument("key cannot be empty".to_string()));
        }
        if field_name.trim().is_empty() {
            return Err(RepoError::InvalidArgument(
                "field name cannot be empty".to_string(),
            ));
        }

        let store_key = self.key(key);
        let operations = [Operation::new(
            OperationKind::Add,
            field_name,
            Value::Int(delta),
        )];
        let mut record = self
            .client
            .operate(&store_key, &operations, Some(&[field_name][..]))
            .map_err(|err| self.write_failed("add", &store_key, err))?;
        let value = record.bins.remove(field_name).ok_or_else(|| {
            RepoError::Store(StoreError::InvalidData(format!(
                "bin `{field_name}` missing after add on {store_key}"
            )))
        })?;
        Ok(i64::from_value(&value)?)
    }

    pub fn prepend_fields(&self, entity: &E, fields: &BTreeMap<String, Value>) -> RepoResult<E> {
        self.operate(
            entity,
            OperationKind::Prepend,
            fields.iter().map(|(name, value)| (name.as_str(), value.clone())),
        )
    }

    pub fn append_fields(&self, entity: &E, fields: &BTreeMap<String, Value>) -> RepoResult<E> {
        self.operate(
            entity,
            OperationKind::Append,
            fields.iter().map(|(name, value)| (name.as_str(), value.clone())),
        )
    }

    pub fn add_fields(&self, entity: &E, fields: &BTreeMap<String, Value>) -> RepoResult<E> {
        self.operate(
            entity,
            OperationKind::Add,
            fields.iter().map(|(name, value)| (name.as_str(), value.clone())),
        )
    }

    /// Runs all operations as one store-side call and returns the resulting
    /// record.
    fn operate<'a, I>(&self, entity: &E, kind: OperationKind, fields: I) -> RepoResult<E>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let key = self.entity_key(entity)?;

        let mut operations = Vec::new();
        for (name, value) in fields {
            if name.trim().is_empty() {
                return Err(RepoError::InvalidArgument(
                    "field name cannot be empty".to_string(),
                ));
            }
            if kind == OperationKind::Add && value.as_int().is_none() {
                return Err(RepoError::InvalidArgument(format!(
                    "add on `{name}` needs an integer, got {}",
                    value.kind()
                )));
            }
            operations.push(Operation::new(kind, name, value));
        }
        if operations.is_empty() {
            return Err(RepoError::InvalidArgument(
                "no fields given for operation".to_string(),
            ));
        }

        let record = self
            .client
            .operate(&key, &operations, None)
            .map_err(|err| self.write_failed(kind.as_str(), &key, err))?;
        Ok(materialize::<E>(record))
    }

    /// Returns whether a record was removed.
    pub fn delete(&self, key: &str) -> RepoResult<bool> {
        if key.trim().is_empty() {
            return Err(RepoError::InvalidArgument("key cannot be empty".to_string()));
        }
        let store_key = self.key(key);
        self.client
            .delete(&store_key)
            .map_err(|err| self.write_failed("delete", &store_key, err))
    }

    /// Deletes keys one by one; returns how many existed.
    pub fn delete_many<K: AsRef<str>>(&self, keys: &[K]) -> RepoResult<usize> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key.as_ref())? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Scans the set and deletes every record. Meant for test teardown.
    pub fn delete_all(&self) -> RepoResult<usize> {
        let mut cursor = Cursor::<E>::new(self.client.scan_all(&self.namespace, &self.set_name)?);
        let mut removed = 0;
        while let Some(item) = cursor.next_key_record()? {
            if self
                .client
                .delete(&item.key)
                .map_err(|err| self.write_failed("delete_all", &item.key, err))?
            {
                removed += 1;
            }
        }
        info!(
            "event=set_truncate module=repo status=ok ns={} set={} removed={}",
            self.namespace, self.set_name, removed
        );
        Ok(removed)
    }
}
