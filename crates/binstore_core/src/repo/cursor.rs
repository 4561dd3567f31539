//! Lazy, forward-only sequence of entities over a store stream.
//!
//! # Responsibility
//! - Adapt a raw `RecordStream` into typed entities.
//! - Own the release of the server-side cursor.
//!
//! # Invariants
//! - The stream is closed exactly once: on exhaustion, on the first error,
//!   on an explicit `close()`, or on drop, whichever comes first.
//! - A closed cursor yields nothing.
//! - Single consumer; not `Sync`.

use crate::model::entity::Entity;
use crate::model::record::Record;
use crate::repo::entity_repo::{RepoError, RepoResult};
use crate::store::{KeyRecord, RecordStream, StoreRecord};
use std::marker::PhantomData;

/// Rebuilds an entity from a raw store record, exactly as a point read does.
pub(crate) fn materialize<E: Entity>(record: StoreRecord) -> E {
    E::from_record(Record::from_bins(
        record.bins,
        record.generation,
        record.expiration,
    ))
}

pub struct Cursor<E> {
    stream: Box<dyn RecordStream>,
    peeked: Option<KeyRecord>,
    closed: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Cursor<E> {
    pub(crate) fn new(stream: Box<dyn RecordStream>) -> Self {
        Self {
            stream,
            peeked: None,
            closed: false,
            _entity: PhantomData,
        }
    }

    /// Pulls ahead one record when needed; closes the stream once drained.
    pub fn has_next(&mut self) -> RepoResult<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        if self.closed {
            return Ok(false);
        }
        match self.stream.next_record() {
            Ok(Some(item)) => {
                self.peeked = Some(item);
                Ok(true)
            }
            Ok(None) => {
                self.close();
                Ok(false)
            }
            Err(err) => {
                self.close();
                Err(RepoError::Store(err))
            }
        }
    }

    /// Next entity, or `None` once the cursor is exhausted or closed.
    pub fn next_entity(&mut self) -> RepoResult<Option<E>> {
        Ok(self
            .next_key_record()?
            .map(|item| materialize::<E>(item.record)))
    }

    pub(crate) fn next_key_record(&mut self) -> RepoResult<Option<KeyRecord>> {
        if !self.has_next()? {
            return Ok(None);
        }
        Ok(self.peeked.take())
    }

    /// Releases the server-side cursor. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.peeked = None;
        self.stream.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<E: Entity> Iterator for Cursor<E> {
    type Item = RepoResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entity().transpose()
    }
}

impl<E> Drop for Cursor<E> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stream.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Cursor;
    use crate::model::record::Record;
    use crate::model::value::Value;
    use crate::store::{Key, KeyRecord, RecordStream, StoreError, StoreRecord, StoreResult};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedStream {
        items: VecDeque<StoreResult<Option<KeyRecord>>>,
        closes: Arc<AtomicUsize>,
    }

    impl RecordStream for ScriptedStream {
        fn next_record(&mut self) -> StoreResult<Option<KeyRecord>> {
            self.items.pop_front().unwrap_or(Ok(None))
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn item(user_key: &str) -> StoreResult<Option<KeyRecord>> {
        Ok(Some(KeyRecord {
            key: Key::new("test", "Record", user_key),
            record: StoreRecord {
                bins: HashMap::from([("key".to_string(), Value::Str(user_key.to_string()))]),
                generation: 1,
                expiration: 0,
            },
        }))
    }

    fn cursor(
        items: Vec<StoreResult<Option<KeyRecord>>>,
    ) -> (Cursor<Record>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let stream = ScriptedStream {
            items: items.into(),
            closes: Arc::clone(&closes),
        };
        (Cursor::new(Box::new(stream)), closes)
    }

    #[test]
    fn exhausting_the_cursor_closes_once() {
        let (mut cursor, closes) = cursor(vec![item("a"), item("b")]);
        let keys: Vec<String> = cursor
            .by_ref()
            .map(|record| record.unwrap().get_string("key").unwrap().unwrap())
            .collect();

        assert_eq!(keys, vec!["a", "b"]);
        assert!(cursor.is_closed());
        drop(cursor);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_early_closes_once() {
        let (mut cursor, closes) = cursor(vec![item("a"), item("b")]);
        assert!(cursor.has_next().unwrap());
        assert!(cursor.has_next().unwrap());
        drop(cursor);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stream_error_closes_and_ends_iteration() {
        let (mut cursor, closes) = cursor(vec![
            item("a"),
            Err(StoreError::InvalidData("broken page".into())),
            item("c"),
        ]);

        assert!(cursor.next().unwrap().is_ok());
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
        cursor.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
