//! End-to-end scenarios across engines, codecs and the connection cache.

use docket_core::{
    id_field, CacheConfig, CborCodec, Collection, CollectionConfig, Connection, ConnectionCache,
    CoreError, Database, IdAccessor, Identity, JsonCodec,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: i32,
    name: String,
}

impl Identity for Item {
    fn id(&self) -> i32 {
        self.id
    }

    fn set_id(&mut self, id: i32) {
        self.id = id;
    }
}

fn item(id: i32, name: &str) -> Item {
    Item {
        id,
        name: name.into(),
    }
}

/// A record whose identity lives in a differently named field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ticket {
    number: i32,
    title: String,
}

fn open_items(base: &std::path::Path, config: CollectionConfig) -> Collection<Item, JsonCodec> {
    Collection::open(base, "items", JsonCodec, Some(IdAccessor::identity()), config).unwrap()
}

#[test]
fn append_log_buffers_until_forced() {
    let dir = tempdir().unwrap();
    let config = CollectionConfig::new().flush_interval(Duration::from_millis(1000));
    let log = dir.path().join("items.collection");

    let items = open_items(dir.path(), config.clone());
    items.add(item(0, "A")).unwrap();
    items.add(item(0, "B")).unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(std::fs::metadata(&log).unwrap().len(), 0);

    items.force_save().unwrap();
    assert!(std::fs::metadata(&log).unwrap().len() > 0);
    items.close().unwrap();
    drop(items);

    let items = open_items(dir.path(), config);
    let names: Vec<String> = items.to_vec().into_iter().map(|i| i.name).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[test]
fn database_remove_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path(), "items", JsonCodec, Some(IdAccessor::identity()))
            .unwrap();
        let ids = db.add_range([item(0, "a"), item(0, "b")]).unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert!(db.remove_id(1).unwrap());
    }

    let db: Database<Item, JsonCodec> =
        Database::open(dir.path(), "items", JsonCodec, Some(IdAccessor::identity())).unwrap();
    assert_eq!(db.len(), 1);
    assert!(db.contains(2).unwrap());
    assert!(!db.contains(1).unwrap());
}

#[test]
fn drop_flushes_pending_writes() {
    let dir = tempdir().unwrap();
    let config = CollectionConfig::new().flush_interval(Duration::from_secs(60));
    {
        let items = open_items(dir.path(), config.clone());
        items.add(item(0, "kept")).unwrap();
    }

    let items = open_items(dir.path(), config);
    assert_eq!(items.to_vec(), vec![item(1, "kept")]);
}

#[test]
fn custom_id_field() {
    let dir = tempdir().unwrap();
    let accessor = id_field!(Ticket, number);
    let tickets = Database::open(dir.path(), "tickets", CborCodec, Some(accessor)).unwrap();

    let number = tickets
        .add(Ticket {
            number: 0,
            title: "first".into(),
        })
        .unwrap();
    assert_eq!(number, 1);
    assert_eq!(tickets.get(1).unwrap().unwrap().title, "first");
    assert!(matches!(
        tickets.add(Ticket {
            number: 1,
            title: "again".into(),
        }),
        Err(CoreError::DuplicateId { id: 1 })
    ));
}

#[test]
fn both_codecs_round_trip() {
    let dir = tempdir().unwrap();
    let config = CollectionConfig::new().flush_interval(Duration::from_secs(60));
    {
        let json = open_items(dir.path(), config.clone());
        let cbor: Collection<Item, CborCodec> = Collection::open(
            dir.path(),
            "items_cbor",
            CborCodec,
            Some(IdAccessor::identity()),
            config.clone(),
        )
        .unwrap();
        for name in ["x", "y", "z"] {
            json.add(item(0, name)).unwrap();
            cbor.add(item(0, name)).unwrap();
        }
    }

    let json = open_items(dir.path(), config.clone());
    let cbor: Collection<Item, CborCodec> = Collection::open(
        dir.path(),
        "items_cbor",
        CborCodec,
        Some(IdAccessor::identity()),
        config,
    )
    .unwrap();
    assert_eq!(json.to_vec(), cbor.to_vec());
    assert_eq!(json.len(), 3);
}

#[test]
fn cached_collection_is_shared_and_reopened_after_kill() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(ConnectionCache::new(CacheConfig::new().sweep_interval(None)).unwrap());
    let config = CollectionConfig::new().flush_interval(Duration::from_secs(60));

    let conn = Connection::collection(
        &cache,
        dir.path(),
        "items",
        JsonCodec,
        Some(IdAccessor::<Item>::identity()),
        config,
    )
    .unwrap();
    let other = conn.clone();

    let first = conn.get().unwrap();
    first.add(item(0, "shared")).unwrap();
    assert!(Arc::ptr_eq(&first, &other.get().unwrap()));
    drop(first);

    assert!(conn.kill());
    assert!(!cache.contains(conn.key()));

    let reopened = other.get().unwrap();
    assert_eq!(reopened.to_vec(), vec![item(1, "shared")]);
}

#[test]
fn idle_database_is_closed() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(
        ConnectionCache::new(
            CacheConfig::new()
                .idle_timeout(Duration::from_millis(30))
                .sweep_interval(Some(Duration::from_millis(10))),
        )
        .unwrap(),
    );

    let conn = Connection::database(
        &cache,
        dir.path(),
        "items",
        JsonCodec,
        Some(IdAccessor::<Item>::identity()),
    )
    .unwrap();
    let db = conn.get().unwrap();
    db.add(item(0, "a")).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while cache.contains(conn.key()) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!cache.contains(conn.key()));
    assert!(matches!(db.add(item(0, "b")), Err(CoreError::Closed { .. })));

    let fresh = conn.get().unwrap();
    assert!(!Arc::ptr_eq(&db, &fresh));
    assert_eq!(fresh.len(), 1);
}

#[test]
fn mismatched_engine_types_are_rejected() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(ConnectionCache::new(CacheConfig::new().sweep_interval(None)).unwrap());

    let as_db = Connection::database(
        &cache,
        dir.path(),
        "items",
        JsonCodec,
        Some(IdAccessor::<Item>::identity()),
    )
    .unwrap();
    let as_log = Connection::collection(
        &cache,
        dir.path(),
        "items",
        JsonCodec,
        Some(IdAccessor::<Item>::identity()),
        CollectionConfig::default(),
    )
    .unwrap();

    as_db.get().unwrap();
    assert!(matches!(
        as_log.get(),
        Err(CoreError::ConnectionTypeMismatch { .. })
    ));
}

#[test]
fn concurrent_writers_share_one_collection() {
    let dir = tempdir().unwrap();
    let items = Arc::new(open_items(
        dir.path(),
        CollectionConfig::new().flush_interval(Duration::from_millis(5)),
    ));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let items = Arc::clone(&items);
            std::thread::spawn(move || {
                for i in 0..25 {
                    items.add(item(0, &format!("{t}-{i}"))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    items.force_save().unwrap();
    let mut ids: Vec<i32> = items.to_vec().iter().map(|i| i.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=100).collect::<Vec<_>>());

    let before = items.to_vec();
    drop(items);
    let items = open_items(dir.path(), CollectionConfig::default());
    assert_eq!(items.to_vec(), before);
}

/// One step against an append-log collection.
#[derive(Debug, Clone)]
enum LogOp {
    Add(u8),
    RemoveId(u8),
    RemoveAt(u8),
    RemoveWhere(u8),
    Replace(u8, u8),
    Optimize,
    ForceSave,
}

fn log_op() -> impl Strategy<Value = LogOp> {
    prop_oneof![
        4 => any::<u8>().prop_map(LogOp::Add),
        2 => (0u8..16).prop_map(LogOp::RemoveId),
        1 => any::<u8>().prop_map(LogOp::RemoveAt),
        1 => (0u8..5).prop_map(LogOp::RemoveWhere),
        2 => (0u8..16, any::<u8>()).prop_map(|(id, n)| LogOp::Replace(id, n)),
        1 => Just(LogOp::Optimize),
        1 => Just(LogOp::ForceSave),
    ]
}

fn apply_log_op(items: &Collection<Item, JsonCodec>, op: &LogOp) {
    match op {
        LogOp::Add(n) => {
            items.add(item(0, &n.to_string())).unwrap();
        }
        LogOp::RemoveId(id) => {
            items.remove_id(i32::from(*id)).unwrap();
        }
        LogOp::RemoveAt(n) => {
            let len = items.len();
            if len > 0 {
                items.remove_at(usize::from(*n) % len).unwrap();
            }
        }
        LogOp::RemoveWhere(k) => {
            // Ids are never negative, so k == 4 removes nothing.
            items.remove_where(|i| i.id % 4 == i32::from(*k)).unwrap();
        }
        LogOp::Replace(id, n) => {
            items.replace(item(i32::from(*id), &format!("r{n}"))).unwrap();
        }
        LogOp::Optimize => items.optimize().unwrap(),
        LogOp::ForceSave => items.force_save().unwrap(),
    }
}

/// One step against a disk database, checked against a model map.
#[derive(Debug, Clone)]
enum DbOp {
    Add(u8, u8),
    RemoveId(u8),
    Replace(u8, u8),
    Optimize,
    Clear,
}

fn db_op() -> impl Strategy<Value = DbOp> {
    prop_oneof![
        5 => (0u8..24, any::<u8>()).prop_map(|(id, n)| DbOp::Add(id, n)),
        3 => (0u8..24).prop_map(DbOp::RemoveId),
        2 => (0u8..24, any::<u8>()).prop_map(|(id, n)| DbOp::Replace(id, n)),
        1 => Just(DbOp::Optimize),
        1 => Just(DbOp::Clear),
    ]
}

fn apply_db_op(db: &Database<Item, JsonCodec>, model: &mut BTreeMap<i32, String>, op: &DbOp) {
    match op {
        DbOp::Add(id, n) => {
            let id = i32::from(*id);
            let name = n.to_string();
            if id != 0 && model.contains_key(&id) {
                assert!(matches!(
                    db.add(item(id, &name)),
                    Err(CoreError::DuplicateId { .. })
                ));
                return;
            }
            let assigned = db.add(item(id, &name)).unwrap();
            if id != 0 {
                assert_eq!(assigned, id);
            }
            assert!(model.insert(assigned, name).is_none());
        }
        DbOp::RemoveId(id) => {
            let id = i32::from(*id);
            assert_eq!(db.remove_id(id).unwrap(), model.remove(&id).is_some());
        }
        DbOp::Replace(id, n) => {
            let name = format!("r{n}");
            let assigned = db.replace(item(i32::from(*id), &name)).unwrap();
            model.insert(assigned, name);
        }
        DbOp::Optimize => db.optimize().unwrap(),
        DbOp::Clear => {
            db.clear().unwrap();
            model.clear();
        }
    }
}

fn db_contents(db: &Database<Item, JsonCodec>) -> BTreeMap<i32, String> {
    db.iter()
        .unwrap()
        .map(|i| i.map(|i| (i.id, i.name)))
        .collect::<Result<BTreeMap<_, _>, _>>()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn zero_ids_follow_the_maximum(explicit in prop::collection::hash_set(1i32..1000, 0..8), k in 1usize..8) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path(), "items", JsonCodec, Some(IdAccessor::identity())).unwrap();

        let explicit: Vec<i32> = explicit.into_iter().collect();
        db.add_range(explicit.iter().map(|id| item(*id, "explicit"))).unwrap();
        let max = explicit.iter().copied().max().unwrap_or(0);

        let ids = db.add_range((0..k).map(|_| item(0, "auto"))).unwrap();
        let expected: Vec<i32> = (1..=k as i32).map(|n| max + n).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn collection_replay_matches_memory(
        ops in prop::collection::vec(log_op(), 1..60),
        per_flush in 0usize..4,
    ) {
        let dir = tempdir().unwrap();
        let config = CollectionConfig::new()
            .flush_interval(Duration::from_millis(2))
            .max_items_per_flush(per_flush);
        let expected = {
            let items = open_items(dir.path(), config.clone());
            for op in &ops {
                apply_log_op(&items, op);
            }
            items.to_vec()
        };

        let items = open_items(dir.path(), config);
        prop_assert_eq!(items.to_vec(), expected);
    }

    #[test]
    fn database_replay_matches_model(ops in prop::collection::vec(db_op(), 1..60)) {
        let dir = tempdir().unwrap();
        let mut model = BTreeMap::new();
        {
            let db = Database::open(dir.path(), "items", JsonCodec, Some(IdAccessor::identity())).unwrap();
            for op in &ops {
                apply_db_op(&db, &mut model, op);
            }
            prop_assert_eq!(db.len(), model.len());
            prop_assert_eq!(db_contents(&db), model.clone());
        }

        let db: Database<Item, JsonCodec> =
            Database::open(dir.path(), "items", JsonCodec, Some(IdAccessor::identity())).unwrap();
        prop_assert_eq!(db_contents(&db), model);
    }
}
