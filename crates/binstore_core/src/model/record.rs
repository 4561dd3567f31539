//! Record model with per-field change tracking.
//!
//! # Responsibility
//! - Hold bin name -> wire value pairs for one keyed record.
//! - Track which bins changed since the snapshot was read from the store.
//! - Expose typed accessors through the value codec.
//!
//! # Invariants
//! - Every stored value has already been encoded; getters always decode.
//! - `dirty_fields` is only populated while `generation > 0`.
//! - Writing a value whose canonical text equals the current one is a no-op
//!   for dirty tracking.
//! - Writes to an immutable record are dropped and logged, never raised.

use crate::model::entity::EntityDescriptor;
use crate::model::value::{CodecError, FromValue, IntoValue, Value};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use log::error;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

/// Store epoch (2010-01-01T00:00:00Z) in unix milliseconds.
pub const STORE_EPOCH_UNIX_MS: i64 = 1_262_304_000_000;

/// One bin slot: `None` is the explicit clear marker, distinct from absence.
pub type Slot = Option<Value>;

/// Keyed bin container shared by every domain type.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: HashMap<String, Slot>,
    generation: u32,
    expiration: u32,
    dirty_fields: BTreeSet<String>,
    mutable: bool,
    modified: bool,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    /// Creates a fresh, mutable, never-synchronized record.
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
            generation: 0,
            expiration: 0,
            dirty_fields: BTreeSet::new(),
            mutable: true,
            modified: false,
        }
    }

    /// Creates a record from already-encoded bins and store metadata.
    ///
    /// Used on every read path; values are taken as wire values verbatim.
    pub fn from_bins(
        bins: impl IntoIterator<Item = (String, Value)>,
        generation: u32,
        expiration: u32,
    ) -> Self {
        Self {
            fields: bins
                .into_iter()
                .map(|(name, value)| (name, Some(value)))
                .collect(),
            generation,
            expiration,
            ..Self::new()
        }
    }

    /// Creates an immutable snapshot; setters on it are refused.
    pub fn read_only(
        bins: impl IntoIterator<Item = (String, Value)>,
        generation: u32,
        expiration: u32,
    ) -> Self {
        Self::from_bins(bins, generation, expiration).with_mutable(false)
    }

    pub fn with_mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn expiration(&self) -> u32 {
        self.expiration
    }

    /// True when either store counter is nonzero.
    pub fn is_from_store(&self) -> bool {
        self.generation != 0 || self.expiration != 0
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// True once any setter stored a value since construction or `clear`.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn dirty_fields(&self) -> &BTreeSet<String> {
        &self.dirty_fields
    }

    pub fn clear_dirty_fields(&mut self) {
        self.dirty_fields.clear();
    }

    /// Full bin mapping, including explicit null markers.
    pub fn fields(&self) -> &HashMap<String, Slot> {
        &self.fields
    }

    /// Raw wire value of one bin; `None` for both unset and null.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(Option::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Decodes one bin; unset and null bins decode to `Ok(None)`.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<Option<T>, CodecError> {
        self.get(name).map(T::from_value).transpose()
    }

    pub fn get_string(&self, name: &str) -> Result<Option<String>, CodecError> {
        self.get_as(name)
    }

    pub fn get_long(&self, name: &str) -> Result<Option<i64>, CodecError> {
        self.get_as(name)
    }

    pub fn get_integer(&self, name: &str) -> Result<Option<i32>, CodecError> {
        self.get_as(name)
    }

    pub fn get_short(&self, name: &str) -> Result<Option<i16>, CodecError> {
        self.get_as(name)
    }

    pub fn get_double(&self, name: &str) -> Result<Option<f64>, CodecError> {
        self.get_as(name)
    }

    pub fn get_float(&self, name: &str) -> Result<Option<f32>, CodecError> {
        self.get_as(name)
    }

    pub fn get_boolean(&self, name: &str) -> Result<Option<bool>, CodecError> {
        self.get_as(name)
    }

    pub fn get_timestamp(&self, name: &str) -> Result<Option<DateTime<Utc>>, CodecError> {
        self.get_as(name)
    }

    pub fn get_decimal(&self, name: &str) -> Result<Option<BigDecimal>, CodecError> {
        self.get_as(name)
    }

    pub fn get_list(&self, name: &str) -> Result<Option<Vec<Value>>, CodecError> {
        self.get_as(name)
    }

    pub fn get_map(&self, name: &str) -> Result<Option<BTreeMap<String, Value>>, CodecError> {
        self.get_as(name)
    }

    /// Encodes and stores one bin value.
    pub fn set_value<T: IntoValue>(&mut self, name: &str, value: T) {
        self.store_slot(name, Some(value.into_value()));
    }

    /// Stores the explicit clear marker; the store drops the bin on write.
    pub fn set_null(&mut self, name: &str) {
        self.store_slot(name, None);
    }

    fn store_slot(&mut self, name: &str, value: Slot) {
        if !self.mutable {
            error!(
                "event=record_write module=model status=rejected reason=immutable bin={}",
                name
            );
            return;
        }

        let unchanged = match (self.fields.get(name), &value) {
            (Some(None), None) => true,
            (Some(Some(current)), Some(next)) => current.canonical_text() == next.canonical_text(),
            (None, None) => true,
            _ => false,
        };

        if !unchanged && self.generation > 0 {
            self.dirty_fields.insert(name.to_string());
        }

        self.fields.insert(name.to_string(), value);
        self.modified = true;
    }

    /// Returns the record to its fresh lifecycle state.
    pub fn clear(&mut self) {
        self.fields.clear();
        self.dirty_fields.clear();
        self.generation = 0;
        self.expiration = 0;
        self.mutable = true;
        self.modified = false;
    }

    /// Read-only view of bin names.
    pub fn key_set(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.keys().map(String::as_str)
    }

    /// Read-only view of bin entries, null markers included.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&Value>)> + '_ {
        self.fields
            .iter()
            .map(|(name, slot)| (name.as_str(), slot.as_ref()))
    }

    /// Seconds until the store expires this record.
    ///
    /// `-1` when no TTL was observed; an already-due record reports `1`.
    pub fn time_to_live(&self) -> i64 {
        if self.expiration == 0 {
            return -1;
        }
        let now = store_epoch_now_secs();
        let expiration = i64::from(self.expiration);
        if expiration <= now {
            1
        } else {
            expiration - now
        }
    }

    /// Mandatory names from the descriptor that are unset or null.
    ///
    /// Advisory only; repository writes do not enforce it.
    pub fn missing_mandatory_fields(&self, descriptor: &EntityDescriptor) -> Vec<&'static str> {
        descriptor
            .mandatory_fields
            .iter()
            .copied()
            .filter(|name| self.get(name).is_none())
            .collect()
    }
}

/// Current time in whole seconds since the store epoch.
pub fn store_epoch_now_secs() -> i64 {
    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0);
    (unix_ms - STORE_EPOCH_UNIX_MS) / 1000
}

#[cfg(test)]
mod tests {
    use super::{store_epoch_now_secs, Record};
    use crate::model::value::Value;

    fn synced(bins: Vec<(&str, Value)>) -> Record {
        Record::from_bins(
            bins.into_iter().map(|(name, value)| (name.to_string(), value)),
            3,
            0,
        )
    }

    #[test]
    fn fresh_record_does_not_track_dirty_fields() {
        let mut record = Record::new();
        record.set_value("var_integer", 12_i32);
        record.set_value("var_integer", 13_i32);
        assert!(record.dirty_fields().is_empty());
        assert!(record.is_modified());
    }

    #[test]
    fn same_canonical_text_is_not_dirty() {
        let mut record = synced(vec![("var_integer", Value::Int(12))]);
        record.set_value("var_integer", 12_i32);
        assert!(record.dirty_fields().is_empty());

        record.set_value("var_integer", 12.0_f64);
        assert!(record.dirty_fields().is_empty());
        assert_eq!(record.get("var_integer"), Some(&Value::Double(12.0)));
    }

    #[test]
    fn changed_value_adds_exactly_one_name() {
        let mut record = synced(vec![
            ("var_integer", Value::Int(12)),
            ("var_string", Value::Str("a".into())),
        ]);
        record.set_value("var_integer", 13_i32);
        assert_eq!(record.dirty_fields().len(), 1);
        assert!(record.dirty_fields().contains("var_integer"));
    }

    #[test]
    fn null_over_null_is_noop_and_null_over_value_is_dirty() {
        let mut record = synced(vec![("var_string", Value::Str("a".into()))]);
        record.set_null("missing");
        assert!(record.dirty_fields().is_empty());
        assert!(record.contains("missing"));

        record.set_null("var_string");
        assert!(record.dirty_fields().contains("var_string"));
        assert_eq!(record.get("var_string"), None);

        record.clear_dirty_fields();
        record.set_null("var_string");
        assert!(record.dirty_fields().is_empty());
    }

    #[test]
    fn immutable_record_refuses_writes_silently() {
        let mut record =
            Record::read_only(vec![("name".to_string(), Value::Str("a".into()))], 1, 0);
        record.set_value("name", "b");
        assert_eq!(record.get_string("name").unwrap().as_deref(), Some("a"));
        assert!(!record.is_modified());
        assert!(record.dirty_fields().is_empty());
    }

    #[test]
    fn clear_resets_lifecycle_state() {
        let mut record = synced(vec![("a", Value::Int(1))]).with_mutable(false);
        record.clear();
        assert!(record.fields().is_empty());
        assert_eq!(record.generation(), 0);
        assert_eq!(record.expiration(), 0);
        assert!(record.is_mutable());
        assert!(!record.is_from_store());
    }

    #[test]
    fn from_store_is_inclusive_or_of_counters() {
        assert!(!Record::from_bins(Vec::new(), 0, 0).is_from_store());
        assert!(Record::from_bins(Vec::new(), 1, 0).is_from_store());
        assert!(Record::from_bins(Vec::new(), 0, 42).is_from_store());
    }

    #[test]
    fn time_to_live_reports_remaining_seconds() {
        assert_eq!(Record::new().time_to_live(), -1);

        let future = (store_epoch_now_secs() + 600) as u32;
        let ttl = Record::from_bins(Vec::new(), 1, future).time_to_live();
        assert!(ttl > 590 && ttl <= 600, "unexpected ttl {ttl}");

        assert_eq!(Record::from_bins(Vec::new(), 1, 5).time_to_live(), 1);
    }
}
