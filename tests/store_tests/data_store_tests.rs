//! Tests for RedisDataStore
//!
//! These tests verify:
//! - Init replaces partitions and sets the marker
//! - Init atomicity under a mid-batch failure
//! - Point and full reads
//! - Upsert version rules (newer wins, ties and older lose)
//! - Tombstones
//! - Availability and error propagation
//! - Upsert cost does not grow with the size of the store

use std::time::{Duration, Instant};

use ld_redis_store::{
    Backend, Collection, Config, DataKind, EnvelopeKind, MemoryBackend, PersistentDataStore,
    StoreError,
};

use crate::common::*;

// =============================================================================
// Init Tests
// =============================================================================

#[test]
fn test_not_initialized_before_init() {
    let (_backend, store) = setup_store();
    assert!(!store.is_initialized());
}

#[test]
fn test_init_sets_marker_and_contents() {
    let (_backend, store) = setup_store();
    let flags = flags();
    let segments = segments();

    store
        .init(&[
            Collection::new(
                &flags,
                vec![
                    ("a".to_string(), item(&flags, 1, "flag-a")),
                    ("b".to_string(), item(&flags, 2, "flag-b")),
                ],
            ),
            Collection::new(&segments, vec![("s".to_string(), item(&segments, 5, "seg"))]),
        ])
        .unwrap();

    assert!(store.is_initialized());

    let mut all = store.get_all(&flags).unwrap();
    all.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].0, "a");
    assert_eq!(all[1].0, "b");

    assert_eq!(stored(&store, &flags, "b"), Some((2, false, "flag-b".to_string())));
    assert_eq!(stored(&store, &segments, "s"), Some((5, false, "seg".to_string())));
}

#[test]
fn test_init_replaces_previous_contents() {
    let (_backend, store) = setup_store();
    let flags = flags();

    init_with(&store, &flags, &[("old1", 1, "x"), ("old2", 1, "y")]);
    init_with(&store, &flags, &[("new", 1, "z")]);

    let all = store.get_all(&flags).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, "new");
    assert_eq!(store.get(&flags, "old1").unwrap(), None);
}

#[test]
fn test_init_leaves_unmentioned_kinds_alone() {
    let (_backend, store) = setup_store();
    let flags = flags();
    let segments = segments();

    init_with(&store, &segments, &[("s", 1, "seg")]);
    init_with(&store, &flags, &[("a", 1, "flag")]);

    assert_eq!(stored(&store, &segments, "s"), Some((1, false, "seg".to_string())));
}

#[test]
fn test_init_with_empty_collection_clears_kind() {
    let (_backend, store) = setup_store();
    let flags = flags();

    init_with(&store, &flags, &[("a", 1, "flag")]);
    store.init(&[Collection::new(&flags, Vec::new())]).unwrap();

    assert!(store.get_all(&flags).unwrap().is_empty());
    assert!(store.is_initialized());
}

#[test]
fn test_failed_init_changes_nothing() {
    let (backend, store) = setup_store();
    let flags = flags();

    init_with(&store, &flags, &[("a", 1, "before")]);
    let keys_before = backend.keys();

    // Op 0 is DEL, op 1 is the first HSET
    backend.fail_next_batch_at(1);
    let result = store.init(&[Collection::new(
        &flags,
        vec![("b".to_string(), item(&flags, 2, "after"))],
    )]);

    assert!(result.is_err());
    assert_eq!(backend.keys(), keys_before);
    assert_eq!(stored(&store, &flags, "a"), Some((1, false, "before".to_string())));
    assert_eq!(store.get(&flags, "b").unwrap(), None);
}

#[test]
fn test_failed_first_init_leaves_store_uninitialized() {
    let (backend, store) = setup_store();
    let flags = flags();

    backend.fail_next_batch_at(2);
    let result = store.init(&[Collection::new(
        &flags,
        vec![("a".to_string(), item(&flags, 1, "x"))],
    )]);

    assert!(result.is_err());
    assert!(!store.is_initialized());
    assert!(store.get_all(&flags).unwrap().is_empty());
}

#[test]
fn test_init_key_layout() {
    let (backend, store) = setup_store();
    init_with(&store, &flags(), &[("a", 1, "x")]);

    assert_eq!(
        backend.keys(),
        vec![
            format!("{}:$inited", PREFIX),
            format!("{}:features", PREFIX),
        ]
    );
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_get_missing_item() {
    let (_backend, store) = setup_store();
    init_with(&store, &flags(), &[("a", 1, "x")]);

    assert_eq!(store.get(&flags(), "nope").unwrap(), None);
}

#[test]
fn test_get_from_missing_kind() {
    let (_backend, store) = setup_store();
    assert_eq!(store.get(&flags(), "a").unwrap(), None);
}

#[test]
fn test_get_all_missing_kind_is_empty() {
    let (_backend, store) = setup_store();
    assert!(store.get_all(&flags()).unwrap().is_empty());
}

#[test]
fn test_reads_return_raw_payload() {
    let (_backend, store) = setup_store();
    let flags = flags();
    let written = item(&flags, 9, "body");
    init_with(&store, &flags, &[("a", 9, "body")]);

    let read = store.get(&flags, "a").unwrap().unwrap();
    assert_eq!(read.payload, written.payload);
    assert_eq!(read.version, 0);
}

#[test]
fn test_reserved_kind_is_rejected() {
    let (_backend, store) = setup_store();
    let reserved = EnvelopeKind::new("$inited");

    assert!(matches!(store.get(&reserved, "a"), Err(StoreError::InvalidKind(_))));
    assert!(matches!(
        store.upsert(&reserved, "a", &item(&reserved, 1, "x")),
        Err(StoreError::InvalidKind(_))
    ));
}

// =============================================================================
// Upsert Tests
// =============================================================================

#[test]
fn test_upsert_new_item() {
    let (_backend, store) = setup_store();
    let flags = flags();

    assert!(store.upsert(&flags, "a", &item(&flags, 1, "x")).unwrap());
    assert_eq!(stored(&store, &flags, "a"), Some((1, false, "x".to_string())));
}

#[test]
fn test_upsert_absent_key_with_version_zero() {
    let (_backend, store) = setup_store();
    let flags = flags();

    assert!(store.upsert(&flags, "a", &item(&flags, 0, "x")).unwrap());
    assert_eq!(stored(&store, &flags, "a"), Some((0, false, "x".to_string())));
}

#[test]
fn test_upsert_newer_version_wins() {
    let (_backend, store) = setup_store();
    let flags = flags();
    init_with(&store, &flags, &[("a", 10, "old")]);

    assert!(store.upsert(&flags, "a", &item(&flags, 11, "new")).unwrap());
    assert_eq!(stored(&store, &flags, "a"), Some((11, false, "new".to_string())));
}

#[test]
fn test_upsert_older_version_loses() {
    let (_backend, store) = setup_store();
    let flags = flags();
    init_with(&store, &flags, &[("a", 10, "current")]);

    assert!(!store.upsert(&flags, "a", &item(&flags, 9, "stale")).unwrap());
    assert_eq!(stored(&store, &flags, "a"), Some((10, false, "current".to_string())));
}

#[test]
fn test_upsert_equal_version_never_overwrites() {
    let (_backend, store) = setup_store();
    let flags = flags();
    init_with(&store, &flags, &[("a", 10, "first")]);

    assert!(!store.upsert(&flags, "a", &item(&flags, 10, "second")).unwrap());
    assert_eq!(stored(&store, &flags, "a"), Some((10, false, "first".to_string())));
}

#[test]
fn test_upsert_sequence_keeps_maximum() {
    let (_backend, store) = setup_store();
    let flags = flags();

    let versions = [3u64, 1, 7, 7, 2, 9, 4, 9, 8];
    let mut max_seen: Option<u64> = None;

    for v in versions {
        let applied = store.upsert(&flags, "a", &item(&flags, v, &v.to_string())).unwrap();
        let expected = max_seen.map_or(true, |m| v > m);
        assert_eq!(applied, expected, "version {}", v);
        max_seen = Some(max_seen.map_or(v, |m| m.max(v)));
    }

    assert_eq!(stored(&store, &flags, "a"), Some((9, false, "9".to_string())));
}

#[test]
fn test_upsert_does_not_touch_other_keys() {
    let (_backend, store) = setup_store();
    let flags = flags();
    init_with(&store, &flags, &[("a", 1, "a1"), ("b", 1, "b1")]);

    store.upsert(&flags, "a", &item(&flags, 2, "a2")).unwrap();

    assert_eq!(stored(&store, &flags, "b"), Some((1, false, "b1".to_string())));
}

// =============================================================================
// Tombstone Tests
// =============================================================================

#[test]
fn test_delete_with_newer_version() {
    let (_backend, store) = setup_store();
    let flags = flags();
    init_with(&store, &flags, &[("a", 1, "x")]);

    assert!(store.upsert(&flags, "a", &flags.tombstone(2).unwrap()).unwrap());
    assert_eq!(stored(&store, &flags, "a"), Some((2, true, String::new())));
}

#[test]
fn test_delete_with_same_version_is_ignored() {
    let (_backend, store) = setup_store();
    let flags = flags();
    init_with(&store, &flags, &[("a", 5, "x")]);

    assert!(!store.upsert(&flags, "a", &flags.tombstone(5).unwrap()).unwrap());
    assert_eq!(stored(&store, &flags, "a"), Some((5, false, "x".to_string())));
}

#[test]
fn test_tombstone_blocks_older_resurrection() {
    let (_backend, store) = setup_store();
    let flags = flags();
    init_with(&store, &flags, &[("a", 1, "x")]);

    store.upsert(&flags, "a", &flags.tombstone(5).unwrap()).unwrap();

    assert!(!store.upsert(&flags, "a", &item(&flags, 4, "zombie")).unwrap());
    assert!(store.upsert(&flags, "a", &item(&flags, 6, "reborn")).unwrap());
    assert_eq!(stored(&store, &flags, "a"), Some((6, false, "reborn".to_string())));
}

#[test]
fn test_tombstone_is_listed_by_get_all() {
    let (_backend, store) = setup_store();
    let flags = flags();
    init_with(&store, &flags, &[("a", 1, "x")]);
    store.upsert(&flags, "a", &flags.tombstone(2).unwrap()).unwrap();

    let all = store.get_all(&flags).unwrap();
    assert_eq!(all.len(), 1);
    assert!(flags.deserialize(&all[0].1.payload).unwrap().deleted);
}

// =============================================================================
// Unreadable Item Tests
// =============================================================================

fn store_garbage(backend: &MemoryBackend, key: &str) {
    backend
        .exec_atomic(&[ld_redis_store::backend::WriteOp::HSet {
            key: format!("{}:features", PREFIX),
            field: key.to_string(),
            value: bytes_of("garbage"),
        }])
        .unwrap();
}

fn bytes_of(s: &str) -> bytes::Bytes {
    bytes::Bytes::from(s.as_bytes().to_vec())
}

#[test]
fn test_unreadable_item_is_version_zero_by_default() {
    let (backend, store) = setup_store();
    let flags = flags();
    store_garbage(&backend, "a");

    assert!(!store.upsert(&flags, "a", &item(&flags, 0, "x")).unwrap());
    assert!(store.upsert(&flags, "a", &item(&flags, 100, "x")).unwrap());
    assert_eq!(stored(&store, &flags, "a"), Some((100, false, "x".to_string())));
}

#[test]
fn test_unreadable_item_fails_strict_upsert() {
    let backend = MemoryBackend::new();
    let store = Config::builder()
        .prefix(PREFIX)
        .strict_version_check(true)
        .build()
        .create_data_store_with(backend.clone())
        .unwrap();
    let flags = flags();
    store_garbage(&backend, "a");

    let result = store.upsert(&flags, "a", &item(&flags, 100, "x"));
    assert!(matches!(result, Err(StoreError::Serialization(_))));

    // Nothing was written over the unreadable item
    let raw = backend.hget(&format!("{}:features", PREFIX), "a").unwrap();
    assert_eq!(raw, Some(bytes_of("garbage")));
}

// =============================================================================
// Availability Tests
// =============================================================================

#[test]
fn test_available_without_init() {
    let (_backend, store) = setup_store();
    assert!(store.is_available());
}

#[test]
fn test_unavailable_backend() {
    let (backend, store) = setup_store();
    let flags = flags();
    init_with(&store, &flags, &[("a", 1, "x")]);

    backend.set_unavailable(true);

    assert!(!store.is_available());
    assert!(!store.is_initialized());
    assert!(store.get(&flags, "a").unwrap_err().is_transport());
    assert!(store.get_all(&flags).unwrap_err().is_transport());
    assert!(store.upsert(&flags, "a", &item(&flags, 2, "y")).unwrap_err().is_transport());
    assert!(store
        .init(&[Collection::new(&flags, Vec::new())])
        .unwrap_err()
        .is_transport());

    backend.set_unavailable(false);
    assert!(store.is_initialized());
}

#[test]
fn test_close_is_idempotent() {
    let (_backend, store) = setup_store();
    store.close().unwrap();
    store.close().unwrap();

    assert!(!store.is_available());
    assert!(matches!(store.get(&flags(), "a"), Err(StoreError::Closed)));
}

// =============================================================================
// Scaling Tests
// =============================================================================

#[test]
fn test_upsert_on_large_store_stays_fast() {
    const ITEMS: u64 = 200_000;
    const UPSERTS: u64 = 200;

    let (_backend, store) = setup_store();
    let flags = flags();
    let items = (0..ITEMS)
        .map(|i| (format!("key-{}", i), item(&flags, 1, "x")))
        .collect();
    store.init(&[Collection::new(&flags, items)]).unwrap();

    let start = Instant::now();
    for version in 2..2 + UPSERTS {
        assert!(store.upsert(&flags, "hot", &item(&flags, version, "x")).unwrap());
    }
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_secs(2),
        "{} upserts over {} items took {:?}",
        UPSERTS,
        ITEMS,
        elapsed
    );
    assert_eq!(store.get_all(&flags).unwrap().len(), (ITEMS + 1) as usize);
}
