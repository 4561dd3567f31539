mod common;

use binstore_core::{
    ClientPolicy, Entity, RepoError, Repository, SqliteStore, StoreConfig, StoreError, Value,
};
use common::{memory_store, GeneralEntity};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

fn counter_repo(store: Arc<SqliteStore>) -> Repository<GeneralEntity, SqliteStore> {
    Repository::new(store).unwrap()
}

#[test]
fn append_and_prepend_edit_strings_in_place() {
    let repo = counter_repo(memory_store());
    let mut entity = GeneralEntity::with_key("s");
    entity.set_var_string("middle");
    repo.save(&entity).unwrap();

    let appended = repo.append(&entity, "var_string", "-end").unwrap();
    assert_eq!(appended.var_string().as_deref(), Some("middle-end"));

    let prepended = repo.prepend(&entity, "var_string", "start-").unwrap();
    assert_eq!(prepended.var_string().as_deref(), Some("start-middle-end"));
    assert_eq!(prepended.record().generation(), 3);
}

#[test]
fn add_increments_and_creates_missing_bins() {
    let repo = counter_repo(memory_store());
    let mut entity = GeneralEntity::with_key("c");
    entity.set_var_long(10);
    repo.save(&entity).unwrap();

    let after = repo.add(&entity, "var_long", 5_i64).unwrap();
    assert_eq!(after.var_long(), Some(15));

    let fresh = repo.add(&entity, "hits", 1_i64).unwrap();
    assert_eq!(fresh.record().get("hits"), Some(&Value::Int(1)));
    assert_eq!(fresh.var_long(), Some(15));
}

#[test]
fn add_by_key_returns_the_new_counter() {
    let repo = counter_repo(memory_store());
    let mut entity = GeneralEntity::with_key("k");
    entity.set_var_long(40);
    repo.save(&entity).unwrap();

    assert_eq!(repo.add_by_key("k", "var_long", 2).unwrap(), 42);
    assert_eq!(repo.add_by_key("k", "var_long", -50).unwrap(), -8);
    assert_eq!(repo.find_one("k").unwrap().unwrap().var_long(), Some(-8));

    assert_eq!(repo.add_by_key("fresh", "hits", 3).unwrap(), 3);
    assert!(repo.exists("fresh").unwrap());

    let mut text = GeneralEntity::with_key("t");
    text.set_var_string("x");
    repo.save(&text).unwrap();
    let err = repo.add_by_key("t", "var_string", 1).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Store(StoreError::BinTypeMismatch { .. })
    ));
}

#[test]
fn add_rejects_non_integer_operands_and_bins() {
    let repo = counter_repo(memory_store());
    let mut entity = GeneralEntity::with_key("bad");
    entity.set_var_string("text");
    repo.save(&entity).unwrap();

    let err = repo.add(&entity, "var_long", 1.5_f64).unwrap_err();
    assert!(matches!(err, RepoError::InvalidArgument(_)));

    let err = repo.add(&entity, "var_string", 1_i64).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Store(StoreError::BinTypeMismatch { expected: "int", .. })
    ));

    let err = repo.append(&entity, "var_string", 3_i64).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Store(StoreError::BinTypeMismatch { .. })
    ));
}

#[test]
fn multi_field_operations_apply_as_one_unit() {
    let repo = counter_repo(memory_store());
    let mut entity = GeneralEntity::with_key("m");
    entity.set_var_long(1);
    entity.set_var_integer(2);
    entity.set_var_string("b");
    repo.save(&entity).unwrap();

    let increments = BTreeMap::from([
        ("var_long".to_string(), Value::Int(10)),
        ("var_integer".to_string(), Value::Int(20)),
    ]);
    let after = repo.add_fields(&entity, &increments).unwrap();
    assert_eq!(after.var_long(), Some(11));
    assert_eq!(after.var_integer(), Some(22));
    assert_eq!(after.record().generation(), 2);

    let prefix = BTreeMap::from([("var_string".to_string(), Value::Str("a".into()))]);
    let suffix = BTreeMap::from([("var_string".to_string(), Value::Str("c".into()))]);
    repo.prepend_fields(&entity, &prefix).unwrap();
    let done = repo.append_fields(&entity, &suffix).unwrap();
    assert_eq!(done.var_string().as_deref(), Some("abc"));

    // The failing bin rolls back the whole call.
    let mixed = BTreeMap::from([
        ("var_long".to_string(), Value::Int(1)),
        ("var_string".to_string(), Value::Int(1)),
    ]);
    assert!(repo.add_fields(&entity, &mixed).is_err());
    let unchanged = repo.find_one("m").unwrap().unwrap();
    assert_eq!(unchanged.var_long(), Some(11));

    let err = repo.add_fields(&entity, &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, RepoError::InvalidArgument(_)));
}

#[test]
fn concurrent_adds_lose_no_updates() {
    const THREADS: i64 = 8;
    const ADDS_PER_THREAD: i64 = 50;

    let store = memory_store();
    let repo = Arc::new(counter_repo(store));
    let mut seed = GeneralEntity::with_key("counter");
    seed.set_var_long(100);
    repo.save(&seed).unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let repo = Arc::clone(&repo);
            let target = seed.clone();
            thread::spawn(move || {
                for _ in 0..ADDS_PER_THREAD {
                    repo.add(&target, "var_long", 1_i64).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = repo.find_one("counter").unwrap().unwrap();
    assert_eq!(total.var_long(), Some(100 + THREADS * ADDS_PER_THREAD));
}

#[test]
fn default_ttl_is_stamped_on_writes() {
    let config = StoreConfig {
        client_policy: ClientPolicy {
            default_ttl_secs: 3600,
            ..ClientPolicy::default()
        },
        ..StoreConfig::default()
    };
    let store = Arc::new(SqliteStore::open(&config).unwrap());
    let repo = counter_repo(store);

    let mut entity = GeneralEntity::with_key("ttl");
    entity.set_var_integer(1);
    repo.save(&entity).unwrap();

    let loaded = repo.find_one("ttl").unwrap().unwrap();
    let ttl = loaded.record().time_to_live();
    assert!(ttl > 3500 && ttl <= 3600, "unexpected ttl {ttl}");
    assert!(entity.record().time_to_live() < 0);
}
