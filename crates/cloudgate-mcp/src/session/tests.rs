// crates/cloudgate-mcp/src/session/tests.rs
// ============================================================================
// Module: Session Registry Unit Tests
// Description: Unit tests for session lifecycle and expiry behavior.
// Purpose: Validate registry invariants with deterministic instants.
// Dependencies: cloudgate-mcp
// ============================================================================

//! ## Overview
//! Exercises session creation, validation, rotation, metadata merging, and the
//! TTL sweep with injected instants so no test depends on wall-clock timing.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only registry assertions."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use super::SessionRegistry;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

fn registry() -> SessionRegistry {
    SessionRegistry::new(Duration::from_secs(1800))
}

fn metadata(connection_type: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    entries.insert("connection_type".to_string(), connection_type.to_string());
    entries
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn created_session_validates_until_invalidated() {
    let registry = registry();
    let id = registry.create(metadata("sse"));
    assert!(registry.validate(&id));
    assert!(registry.invalidate(&id));
    assert!(!registry.validate(&id));
}

#[test]
fn invalidate_is_idempotent() {
    let registry = registry();
    let id = registry.create(metadata("sse"));
    assert!(registry.invalidate(&id));
    assert!(!registry.invalidate(&id));
}

#[test]
fn created_ids_are_unique() {
    let registry = registry();
    let first = registry.create(metadata("sse"));
    let second = registry.create(metadata("sse"));
    assert_ne!(first, second);
}

#[test]
fn rotate_unknown_id_returns_none_and_changes_nothing() {
    let registry = registry();
    let id = registry.create(metadata("sse"));
    let rotated = registry.rotate(&id).expect("rotate live session");
    assert!(registry.rotate(&id).is_none());
    let stats = registry.stats();
    assert_eq!(stats.active, 1);
    assert!(registry.validate(&rotated));
}

#[test]
fn rotate_invalidates_old_id_immediately() {
    let registry = registry();
    let old = registry.create(metadata("sse"));
    let new = registry.rotate(&old).expect("rotated id");
    assert_ne!(old, new);
    assert!(!registry.validate(&old));
    assert!(registry.validate(&new));
}

#[test]
fn rotate_preserves_metadata_and_creation_time() {
    let registry = registry();
    let old = registry.create(metadata("sse"));
    let created_at = registry.created_at_ms(&old).expect("creation time");
    let new = registry.rotate(&old).expect("rotated id");
    assert_eq!(registry.created_at_ms(&new), Some(created_at));
    let moved = registry.metadata(&new).expect("metadata");
    assert_eq!(moved.get("connection_type").map(String::as_str), Some("sse"));
    assert!(registry.metadata(&old).is_none());
}

#[test]
fn update_metadata_merges_entries() {
    let registry = registry();
    let id = registry.create(metadata("sse"));
    let mut extra = BTreeMap::new();
    extra.insert("user_agent".to_string(), "curl/8.5.0".to_string());
    assert!(registry.update_metadata(&id, extra));
    let merged = registry.metadata(&id).expect("metadata");
    assert_eq!(merged.get("connection_type").map(String::as_str), Some("sse"));
    assert_eq!(merged.get("user_agent").map(String::as_str), Some("curl/8.5.0"));
}

#[test]
fn update_metadata_returns_false_for_unknown_id() {
    let registry = registry();
    let id = registry.create(metadata("sse"));
    registry.invalidate(&id);
    assert!(!registry.update_metadata(&id, metadata("sse")));
}

#[test]
fn stats_track_created_and_expired_counts() {
    let registry = SessionRegistry::new(Duration::from_millis(100));
    let start = Instant::now();
    let keep = registry.create_at(metadata("sse"), start + Duration::from_millis(500));
    let _drop = registry.create_at(metadata("sse"), start);
    let swept = registry.cleanup_expired_at(start + Duration::from_millis(500));
    assert_eq!(swept, 1);
    let stats = registry.stats_at(start + Duration::from_millis(500));
    assert_eq!(stats.active, 1);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.expired, 1);
    assert!(registry.validate_at(&keep, start + Duration::from_millis(500)));
}

#[test]
fn expired_session_fails_validation_before_sweep() {
    let registry = SessionRegistry::new(Duration::from_millis(100));
    let start = Instant::now();
    let id = registry.create_at(metadata("sse"), start);
    assert!(registry.validate_at(&id, start + Duration::from_millis(50)));
    assert!(!registry.validate_at(&id, start + Duration::from_millis(150)));
}

#[test]
fn cleanup_leaves_fresh_sessions_alone() {
    let registry = SessionRegistry::new(Duration::from_secs(1800));
    let start = Instant::now();
    let _id = registry.create_at(metadata("sse"), start);
    assert_eq!(registry.cleanup_expired_at(start + Duration::from_secs(1)), 0);
    assert_eq!(registry.stats_at(start + Duration::from_secs(1)).active, 1);
}

#[test]
fn touch_extends_session_lifetime() {
    let registry = SessionRegistry::new(Duration::from_secs(1800));
    let id = registry.create(metadata("sse"));
    assert!(registry.touch(&id));
    registry.invalidate(&id);
    assert!(!registry.touch(&id));
}
