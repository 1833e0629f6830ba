use std::collections::HashSet;

use serde_json::json;

use super::*;
use crate::{
    Param,
    testing::{Reply, Script, ScriptedConnection},
};

fn shard(suffix: u64, bits: u32) -> ShardSuffix {
    ShardSuffix::new(suffix, bits).unwrap()
}

fn record(value: serde_json::Value) -> Record {
    serde_json::from_value(value).unwrap()
}

#[test]
fn shard_suffix_composes_ids() {
    let s = shard(1, 2);
    assert_eq!(s.mask(), 0b11);
    assert_eq!((0..3).map(|seq| s.compose(seq)).collect::<Vec<_>>(), [1, 5, 9]);
    assert_eq!(s.sequence(9), 2);
    assert!(s.owns(13));
    assert!(!s.owns(6));

    let whole = shard(0, 0);
    assert_eq!(whole.compose(7), 7);
    assert!(whole.owns(12345));
}

#[test]
fn shard_suffix_rejects_bad_input() {
    assert!(matches!(ShardSuffix::new(4, 2), Err(Error::InvalidArgument(_))));
    assert!(matches!(ShardSuffix::new(0, 63), Err(Error::InvalidArgument(_))));
}

#[test]
fn shard_suffix_from_route() {
    let mut tree = crate::RoutingTree::new();
    tree.insert(0, "a");
    tree.insert(1, "b");
    let route = tree.get(3).unwrap();
    let s = ShardSuffix::from_route(&route);
    assert_eq!((s.suffix(), s.bits()), (1, 1));
}

#[test]
fn refill_threshold() {
    let pool = IdentifierPool::new(shard(0, 0), 10, 50);
    assert!(pool.needs_refill(4));
    assert!(!pool.needs_refill(5));
    assert!(!IdentifierPool::new(shard(0, 0), 10, 0).needs_refill(0));
    assert_eq!(IdentifierPool::new(shard(0, 0), 10, 250).refill_percent(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refill_continues_after_highest_sequence() {
    let mut store = MemoryIdentifierStore::new();
    let pool = IdentifierPool::new(shard(1, 1), 10, 50);

    assert_eq!(pool.refill(&mut store).await.unwrap(), 10);
    assert_eq!(pool.refill(&mut store).await.unwrap(), 0);

    for _ in 0..6 {
        pool.take_id(&mut store).await.unwrap();
    }
    assert_eq!(store.count(IdentifierStatus::Init), 6);
    assert_eq!(pool.refill(&mut store).await.unwrap(), 6);

    // sequences 10..16 follow the initial 0..10
    assert!(store.get(shard(1, 1).compose(10)).is_some());
    assert!(store.get(shard(1, 1).compose(15)).is_some());
    assert!(store.get(shard(1, 1).compose(16)).is_none());
    assert_eq!(store.count(IdentifierStatus::Prealloc), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn take_id_claims_lowest_and_reports_exhaustion() {
    let mut store = MemoryIdentifierStore::new();
    let pool = IdentifierPool::new(shard(1, 2), 2, 100);
    pool.refill(&mut store).await.unwrap();

    assert_eq!(pool.take_id(&mut store).await.unwrap(), 1);
    assert_eq!(pool.take_id(&mut store).await.unwrap(), 5);
    assert!(matches!(pool.take_id(&mut store).await, Err(Error::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_never_collide() {
    let store = MemoryIdentifierStore::new();
    let pool = IdentifierPool::new(shard(0, 0), 200, 100);
    pool.refill(&mut store.clone()).await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let mut store = store.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Ok(id) = pool.take_id(&mut store).await {
                    claimed.push(id);
                    tokio::task::yield_now().await;
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for task in tasks {
        for id in task.await.unwrap() {
            total += 1;
            seen.insert(id);
        }
    }
    assert_eq!(total, 200);
    assert_eq!(seen.len(), 200);
    assert_eq!(store.count(IdentifierStatus::Init), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commit_records_category_and_checksum() {
    let mut store = MemoryIdentifierStore::new();
    let pool = IdentifierPool::new(shard(0, 0), 4, 100);
    pool.refill(&mut store).await.unwrap();

    let id = pool.take_id(&mut store).await.unwrap();
    let person = record(json!({ "Name": "Ada", "Born": 1815 }));
    pool.commit_id(&mut store, id, "Person", &person).await.unwrap();

    let entry = store.get(id).unwrap();
    assert_eq!(entry.status, IdentifierStatus::Actual);
    assert_eq!(entry.category.as_deref(), Some("Person"));
    assert_eq!(entry.checksum, Some(checksum(&person).unwrap()));
    assert_eq!(entry.checksum.unwrap().len(), 64);

    // committing twice finds nothing in Init
    assert!(matches!(
        pool.commit_id(&mut store, id, "Person", &person).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reclaim_returns_orphans_to_the_pool() {
    let mut store = MemoryIdentifierStore::new();
    let pool = IdentifierPool::new(shard(1, 1), 3, 100);
    pool.refill(&mut store).await.unwrap();

    let id = pool.take_id(&mut store).await.unwrap();
    pool.reclaim(&mut store, id).await.unwrap();
    assert_eq!(store.get(id).unwrap().status, IdentifierStatus::Prealloc);
    assert_eq!(pool.take_id(&mut store).await.unwrap(), id);

    assert!(matches!(pool.reclaim(&mut store, 2).await, Err(Error::InvalidArgument(_))));
    assert!(matches!(pool.reclaim(&mut store, 7).await, Err(Error::NotFound(_))));
}

#[test]
fn checksum_depends_on_content() {
    let a = checksum(&record(json!({ "Name": "Ada" }))).unwrap();
    let b = checksum(&record(json!({ "Name": "Alan" }))).unwrap();
    assert_ne!(a, b);
    assert_eq!(a, checksum(&record(json!({ "Name": "Ada" }))).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sql_store_claims_with_skip_locked() {
    let script = Script::default();
    script.rows("FOR UPDATE SKIP LOCKED", json!([{ "Id": 9 }]));
    let mut conn = ScriptedConnection::new(&script);
    let pool = IdentifierPool::new(shard(1, 2), 10, 50);

    let id = pool.take_id(&mut SqlIdentifierStore::new(&mut conn)).await.unwrap();
    assert_eq!(id, 9);
    assert_eq!(
        script.params_of("SKIP LOCKED").unwrap(),
        [Param::id(3), Param::id(1)]
    );

    let script = Script::default();
    let mut conn = ScriptedConnection::new(&script);
    assert!(matches!(
        pool.take_id(&mut SqlIdentifierStore::new(&mut conn)).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sql_store_refill_and_mark_actual() {
    let script = Script::default();
    script
        .rows("count(*)", json!([{ "Count": 2 }]))
        .rows("max(\"Id\")", json!([{ "Max": 13 }]))
        .on("INSERT INTO \"Identifier\"", Reply::Count(8));
    let mut conn = ScriptedConnection::new(&script);
    let pool = IdentifierPool::new(shard(1, 2), 10, 50);

    let inserted = pool.refill(&mut SqlIdentifierStore::new(&mut conn)).await.unwrap();
    assert_eq!(inserted, 8);
    let params = script.params_of("INSERT INTO \"Identifier\"").unwrap();
    assert_eq!(params.len(), 8);
    // 13 is sequence 3 of shard 1/2, so the refill starts at 17
    assert_eq!(params[0], Param::id(17));
    assert_eq!(params[7], Param::id(45));

    let err = SqlIdentifierStore::new(&mut conn)
        .mark_actual(17, "Person", &[1, 2])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    script.on("'Actual'", Reply::Count(1));
    SqlIdentifierStore::new(&mut conn)
        .mark_actual(17, "Person", &[1, 2])
        .await
        .unwrap();
}
