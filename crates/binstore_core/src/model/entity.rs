//! Domain capability interface.
//!
//! # Responsibility
//! - Let each domain type declare its key bin and table name explicitly.
//! - Give the repository access to the underlying `Record` without any
//!   runtime introspection.
//!
//! # Invariants
//! - `EntityDescriptor::key_field` names the single identifier bin.
//! - Key values are strings on the wire.

use crate::model::record::{Record, Slot};
use std::collections::{BTreeSet, HashMap};

/// Static facts about one domain type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Simple type name; default table (set) name.
    pub type_name: &'static str,
    /// Bin holding the record key.
    pub key_field: &'static str,
    /// Optional hint list of bins callers are expected to fill.
    pub mandatory_fields: &'static [&'static str],
}

impl EntityDescriptor {
    pub const fn new(type_name: &'static str, key_field: &'static str) -> Self {
        Self {
            type_name,
            key_field,
            mandatory_fields: &[],
        }
    }

    pub const fn with_mandatory_fields(mut self, fields: &'static [&'static str]) -> Self {
        self.mandatory_fields = fields;
        self
    }
}

/// Capability every persisted domain type implements.
///
/// Implementors are thin wrappers around a [`Record`] that add typed
/// getters/setters for their bins.
pub trait Entity: Sized {
    fn descriptor() -> EntityDescriptor;

    /// Wraps a record reconstructed from the store.
    fn from_record(record: Record) -> Self;

    fn record(&self) -> &Record;

    fn record_mut(&mut self) -> &mut Record;

    fn key_field_name(&self) -> &'static str {
        Self::descriptor().key_field
    }

    fn fields(&self) -> &HashMap<String, Slot> {
        self.record().fields()
    }

    fn dirty_fields(&self) -> &BTreeSet<String> {
        self.record().dirty_fields()
    }

    /// Current key value, when the key bin holds a string.
    fn key(&self) -> Option<&str> {
        self.record()
            .get(self.key_field_name())
            .and_then(|value| value.as_str())
    }
}

/// A bare record is its own entity when addressed by a caller-chosen key bin
/// `"key"`. Handy for schemaless tables.
impl Entity for Record {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("Record", "key")
    }

    fn from_record(record: Record) -> Self {
        record
    }

    fn record(&self) -> &Record {
        self
    }

    fn record_mut(&mut self) -> &mut Record {
        self
    }
}
