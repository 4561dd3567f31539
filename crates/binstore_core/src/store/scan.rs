//! Paged record stream for scans and filtered queries.
//!
//! # Responsibility
//! - Walk a set in user-key order, one page per round trip.
//! - Apply the index filter in SQL and qualifiers in memory.
//!
//! # Invariants
//! - The connection lock is held per page, never across pages.
//! - `close` releases the cursor registration exactly once.

use super::sqlite::{load_record, Shared};
use super::{Filter, Key, KeyRecord, Qualifier, QualifierOp, RecordStream, StoreResult};
use crate::model::record::store_epoch_now_secs;
use crate::model::value::Value;
use log::debug;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

const PAGE_SIZE: i64 = 128;

/// Server-side cursor over one set.
pub struct SqliteRecordStream {
    shared: Arc<Shared>,
    id: Uuid,
    namespace: String,
    set_name: String,
    filter: Option<Filter>,
    qualifiers: Vec<Qualifier>,
    last_key: Option<String>,
    buffer: VecDeque<KeyRecord>,
    exhausted: bool,
    closed: bool,
}

impl SqliteRecordStream {
    pub(super) fn open(
        shared: Arc<Shared>,
        namespace: &str,
        set_name: &str,
        filter: Option<Filter>,
        qualifiers: Vec<Qualifier>,
    ) -> Self {
        let id = shared.register_cursor();
        debug!(
            "event=cursor_open module=store status=ok cursor={} ns={} set={} filtered={} qualifiers={}",
            id,
            namespace,
            set_name,
            filter.is_some(),
            qualifiers.len()
        );
        Self {
            shared,
            id,
            namespace: namespace.to_string(),
            set_name: set_name.to_string(),
            filter,
            qualifiers,
            last_key: None,
            buffer: VecDeque::new(),
            exhausted: false,
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn fetch_page(&mut self) -> StoreResult<()> {
        let (sql, params) = self.page_query();
        let namespace = self.namespace.clone();
        let set_name = self.set_name.clone();

        let page = self.shared.with_conn("scan_page", |conn| {
            let user_keys = {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                    row.get::<_, String>(0)
                })?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            let fetched = user_keys.len();
            let last_key = user_keys.last().cloned();
            let mut page = Vec::with_capacity(fetched);
            for user_key in user_keys {
                let key = Key::new(namespace.as_str(), set_name.as_str(), user_key);
                if let Some(record) = load_record(conn, &key, None)? {
                    page.push(KeyRecord { key, record });
                }
            }
            Ok((fetched, last_key, page))
        });

        let (fetched, last_key, page) = page?;
        if (fetched as i64) < PAGE_SIZE {
            self.exhausted = true;
        }
        if last_key.is_some() {
            self.last_key = last_key;
        }
        let qualifiers = &self.qualifiers;
        self.buffer.extend(
            page.into_iter()
                .filter(|item| qualifiers.iter().all(|q| matches_qualifier(q, &item.record.bins))),
        );
        Ok(())
    }

    fn page_query(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::from(
            "SELECT r.user_key FROM records r
             WHERE r.namespace = ? AND r.set_name = ?
               AND (r.expiration = 0 OR r.expiration > ?)",
        );
        let mut params = vec![
            SqlValue::Text(self.namespace.clone()),
            SqlValue::Text(self.set_name.clone()),
            SqlValue::Integer(store_epoch_now_secs()),
        ];

        if let Some(last_key) = &self.last_key {
            sql.push_str(" AND r.user_key > ?");
            params.push(SqlValue::Text(last_key.clone()));
        }

        if let Some(filter) = &self.filter {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM bins b
                   WHERE b.namespace = r.namespace AND b.set_name = r.set_name
                     AND b.user_key = r.user_key AND b.name = ?",
            );
            params.push(SqlValue::Text(filter.bin().to_string()));
            match filter {
                Filter::Equal {
                    value: Value::Str(text),
                    ..
                } => {
                    sql.push_str(" AND b.kind = 'string' AND b.text_value = ?)");
                    params.push(SqlValue::Text(text.clone()));
                }
                Filter::Equal {
                    value: Value::Int(number),
                    ..
                } => {
                    sql.push_str(" AND b.kind = 'int' AND b.int_value = ?)");
                    params.push(SqlValue::Integer(*number));
                }
                Filter::Range { begin, end, .. } => {
                    sql.push_str(" AND b.kind = 'int' AND b.int_value BETWEEN ? AND ?)");
                    params.push(SqlValue::Integer(*begin));
                    params.push(SqlValue::Integer(*end));
                }
                // Rejected by `select` before a stream is opened.
                Filter::Equal { .. } => sql.push_str(" AND 0)"),
            }
        }

        sql.push_str(" ORDER BY r.user_key LIMIT ?;");
        params.push(SqlValue::Integer(PAGE_SIZE));
        (sql, params)
    }
}

impl RecordStream for SqliteRecordStream {
    fn next_record(&mut self) -> StoreResult<Option<KeyRecord>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page()?;
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.clear();
        let released = self.shared.release_cursor(&self.id);
        debug!(
            "event=cursor_close module=store status=ok cursor={} released={}",
            self.id, released
        );
    }
}

/// A missing bin never satisfies a qualifier.
fn matches_qualifier(qualifier: &Qualifier, bins: &HashMap<String, Value>) -> bool {
    let Some(actual) = bins.get(&qualifier.bin) else {
        return false;
    };
    let expected = &qualifier.value;

    match qualifier.op {
        QualifierOp::Eq => compare(actual, expected) == Some(Ordering::Equal),
        QualifierOp::NotEq => compare(actual, expected) != Some(Ordering::Equal),
        QualifierOp::Gt => compare(actual, expected) == Some(Ordering::Greater),
        QualifierOp::Ge => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        QualifierOp::Lt => compare(actual, expected) == Some(Ordering::Less),
        QualifierOp::Le => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        QualifierOp::StartsWith => text_pair(actual, expected)
            .map(|(a, e)| a.starts_with(e))
            .unwrap_or(false),
        QualifierOp::EndsWith => text_pair(actual, expected)
            .map(|(a, e)| a.ends_with(e))
            .unwrap_or(false),
        QualifierOp::Contains => match actual {
            Value::List(items) => items
                .iter()
                .any(|item| compare(item, expected) == Some(Ordering::Equal)),
            _ => text_pair(actual, expected)
                .map(|(a, e)| a.contains(e))
                .unwrap_or(false),
        },
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
        (Value::Double(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => (left == right).then_some(Ordering::Equal),
    }
}

fn text_pair<'a>(actual: &'a Value, expected: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((actual.as_str()?, expected.as_str()?))
}

#[cfg(test)]
mod tests {
    use super::matches_qualifier;
    use crate::model::value::Value;
    use crate::store::{Qualifier, QualifierOp};
    use std::collections::HashMap;

    fn bins() -> HashMap<String, Value> {
        HashMap::from([
            ("name".to_string(), Value::Str("alice".into())),
            ("age".to_string(), Value::Int(31)),
            (
                "tags".to_string(),
                Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]),
            ),
        ])
    }

    #[test]
    fn numeric_qualifiers_compare_across_representations() {
        let bins = bins();
        assert!(matches_qualifier(
            &Qualifier::new("age", QualifierOp::Ge, Value::Int(31)),
            &bins
        ));
        assert!(matches_qualifier(
            &Qualifier::new("age", QualifierOp::Lt, Value::Double(31.5)),
            &bins
        ));
        assert!(!matches_qualifier(
            &Qualifier::new("age", QualifierOp::Gt, Value::Int(31)),
            &bins
        ));
    }

    #[test]
    fn string_qualifiers_match_affixes() {
        let bins = bins();
        assert!(matches_qualifier(
            &Qualifier::new("name", QualifierOp::StartsWith, Value::Str("al".into())),
            &bins
        ));
        assert!(matches_qualifier(
            &Qualifier::new("name", QualifierOp::EndsWith, Value::Str("ce".into())),
            &bins
        ));
        assert!(matches_qualifier(
            &Qualifier::new("tags", QualifierOp::Contains, Value::Str("b".into())),
            &bins
        ));
    }

    #[test]
    fn missing_bins_never_match() {
        assert!(!matches_qualifier(
            &Qualifier::new("email", QualifierOp::NotEq, Value::Str("x".into())),
            &bins()
        ));
    }
}
