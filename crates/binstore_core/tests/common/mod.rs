#![allow(dead_code)]

use binstore_core::{Entity, EntityDescriptor, Record, SqliteStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

/// Wide fixture covering every codec-supported field kind.
#[derive(Debug, Clone)]
pub struct GeneralEntity {
    record: Record,
}

impl Entity for GeneralEntity {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("GeneralEntity", "key").with_mandatory_fields(&["var_integer"])
    }

    fn from_record(record: Record) -> Self {
        Self { record }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

impl GeneralEntity {
    pub fn with_key(key: &str) -> Self {
        let mut record = Record::new();
        record.set_value("key", key);
        Self { record }
    }

    pub fn var_integer(&self) -> Option<i32> {
        self.record.get_integer("var_integer").unwrap()
    }

    pub fn set_var_integer(&mut self, value: i32) {
        self.record.set_value("var_integer", value);
    }

    pub fn var_boolean(&self) -> Option<bool> {
        self.record.get_boolean("var_boolean").unwrap()
    }

    pub fn set_var_boolean(&mut self, value: bool) {
        self.record.set_value("var_boolean", value);
    }

    pub fn var_long(&self) -> Option<i64> {
        self.record.get_long("var_long").unwrap()
    }

    pub fn set_var_long(&mut self, value: i64) {
        self.record.set_value("var_long", value);
    }

    pub fn var_string(&self) -> Option<String> {
        self.record.get_string("var_string").unwrap()
    }

    pub fn set_var_string(&mut self, value: &str) {
        self.record.set_value("var_string", value);
    }

    pub fn var_double(&self) -> Option<f64> {
        self.record.get_double("var_double").unwrap()
    }

    pub fn set_var_double(&mut self, value: f64) {
        self.record.set_value("var_double", value);
    }

    pub fn var_timestamp(&self) -> Option<DateTime<Utc>> {
        self.record.get_timestamp("var_timestamp").unwrap()
    }

    pub fn set_var_timestamp(&mut self, value: DateTime<Utc>) {
        self.record.set_value("var_timestamp", value);
    }
}

/// Narrow fixture keyed by login name.
#[derive(Debug, Clone)]
pub struct UserLogin {
    record: Record,
}

impl Entity for UserLogin {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("UserLogin", "login")
    }

    fn from_record(record: Record) -> Self {
        Self { record }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

impl UserLogin {
    pub fn new(login: &str, display_name: &str, enabled: bool, age: i64) -> Self {
        let mut record = Record::new();
        record.set_value("login", login);
        record.set_value("display_name", display_name);
        record.set_value("enabled", enabled);
        record.set_value("age", age);
        Self { record }
    }

    pub fn login(&self) -> String {
        self.record.get_string("login").unwrap().unwrap()
    }

    pub fn display_name(&self) -> Option<String> {
        self.record.get_string("display_name").unwrap()
    }

    pub fn enabled(&self) -> Option<bool> {
        self.record.get_boolean("enabled").unwrap()
    }

    pub fn age(&self) -> Option<i64> {
        self.record.get_long("age").unwrap()
    }
}
