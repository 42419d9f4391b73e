//! Tests for RedisBigSegmentStore
//!
//! These tests verify:
//! - Sync metadata reads, including missing and malformed values
//! - Membership resolution from include/exclude sets
//! - Key layout shared with the data store namespace

use std::time::{Duration, UNIX_EPOCH};

use ld_redis_store::backend::WriteOp;
use ld_redis_store::{Backend, BigSegmentStore, Config, MemoryBackend, StoreError};

use crate::common::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn set_sync_time(backend: &MemoryBackend, prefix: &str, value: &str) {
    backend
        .exec_atomic(&[WriteOp::Set {
            key: format!("{}:big_segments_synchronized_on", prefix),
            value: value.to_string(),
        }])
        .unwrap();
}

fn set_segments(
    backend: &MemoryBackend,
    prefix: &str,
    user_hash: &str,
    included: &[&str],
    excluded: &[&str],
) {
    let mut ops = Vec::new();
    for (kind, refs) in [("include", included), ("exclude", excluded)] {
        if !refs.is_empty() {
            ops.push(WriteOp::SAdd {
                key: format!("{}:big_segment_{}:{}", prefix, kind, user_hash),
                members: refs.iter().map(|r| r.to_string()).collect(),
            });
        }
    }
    backend.exec_atomic(&ops).unwrap();
}

// =============================================================================
// Metadata Tests
// =============================================================================

#[test]
fn test_metadata() {
    let (backend, store) = setup_big_segment_store();
    set_sync_time(&backend, PREFIX, "1234567890");

    let metadata = store.get_metadata().unwrap();
    assert_eq!(metadata.last_up_to_date, 1_234_567_890);
    assert_eq!(
        metadata.last_up_to_date_time(),
        UNIX_EPOCH + Duration::from_millis(1_234_567_890)
    );
}

#[test]
fn test_missing_metadata_is_an_error() {
    let (_backend, store) = setup_big_segment_store();
    assert!(matches!(store.get_metadata(), Err(StoreError::MissingMetadata)));
}

#[test]
fn test_malformed_metadata_is_an_error() {
    let (backend, store) = setup_big_segment_store();
    set_sync_time(&backend, PREFIX, "yesterday");

    assert!(matches!(store.get_metadata(), Err(StoreError::InvalidMetadata(_))));
}

#[test]
fn test_metadata_transport_error() {
    let (backend, store) = setup_big_segment_store();
    set_sync_time(&backend, PREFIX, "1");
    backend.set_unavailable(true);

    assert!(store.get_metadata().unwrap_err().is_transport());
}

// =============================================================================
// Membership Tests
// =============================================================================

#[test]
fn test_membership_unknown_user() {
    let (_backend, store) = setup_big_segment_store();

    let membership = store.get_user_membership("nobody").unwrap();
    assert!(membership.is_empty());
    assert_eq!(membership.check("seg1"), None);
}

#[test]
fn test_membership_included() {
    let (backend, store) = setup_big_segment_store();
    set_segments(&backend, PREFIX, "userhash", &["seg1"], &[]);

    let membership = store.get_user_membership("userhash").unwrap();
    assert_eq!(membership.check("seg1"), Some(true));
    assert_eq!(membership.check("seg2"), None);
}

#[test]
fn test_membership_excluded() {
    let (backend, store) = setup_big_segment_store();
    set_segments(&backend, PREFIX, "userhash", &[], &["seg1"]);

    let membership = store.get_user_membership("userhash").unwrap();
    assert_eq!(membership.check("seg1"), Some(false));
}

#[test]
fn test_membership_exclusion_wins() {
    let (backend, store) = setup_big_segment_store();
    set_segments(&backend, PREFIX, "userhash", &["seg1", "seg2"], &["seg2"]);

    let membership = store.get_user_membership("userhash").unwrap();
    assert_eq!(membership.check("seg1"), Some(true));
    assert_eq!(membership.check("seg2"), Some(false));
}

#[test]
fn test_membership_is_per_user() {
    let (backend, store) = setup_big_segment_store();
    set_segments(&backend, PREFIX, "alice", &["seg1"], &[]);

    assert!(store.get_user_membership("bob").unwrap().is_empty());
}

// =============================================================================
// Namespace Tests
// =============================================================================

#[test]
fn test_cluster_prefix_applies_to_big_segments() {
    let backend = MemoryBackend::new();
    let store = Config::builder()
        .prefix("app1")
        .addresses(["a:1", "b:2"])
        .build()
        .create_big_segment_store_with(backend.clone())
        .unwrap();

    set_sync_time(&backend, "{ld}.app1", "42");
    set_segments(&backend, "{ld}.app1", "u", &["seg"], &[]);

    assert_eq!(store.get_metadata().unwrap().last_up_to_date, 42);
    assert_eq!(store.get_user_membership("u").unwrap().check("seg"), Some(true));
}

#[test]
fn test_close_releases_handle() {
    let (_backend, store) = setup_big_segment_store();
    store.close().unwrap();
    store.close().unwrap();

    assert!(matches!(store.get_metadata(), Err(StoreError::Closed)));
}
