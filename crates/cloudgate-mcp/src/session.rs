// crates/cloudgate-mcp/src/session.rs
// ============================================================================
// Module: Session Registry
// Description: Keyed store of streaming session records.
// Purpose: Own session lifecycle for stream-capable transports.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! The session registry owns every session record; the transport gateway holds
//! only ids. All operations treat an unknown id as an ordinary outcome and
//! return a falsy result instead of an error. The table is guarded by a mutex
//! because transport handlers run on a multi-threaded runtime.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

#[cfg(test)]
mod tests;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Opaque unique session token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SessionId(String);

impl SessionId {
    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generates a fresh random token.
    fn generate() -> Self {
        let token: u128 = rand::random();
        Self(format!("{token:032x}"))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored session state.
///
/// # Invariants
/// - `created_at_ms` and the owning id never change after creation; rotation
///   moves the record to a new id without touching either.
#[derive(Debug, Clone)]
struct SessionRecord {
    /// Creation timestamp (milliseconds since epoch).
    created_at_ms: u128,
    /// Last activity instant used for TTL expiry.
    last_activity: Instant,
    /// Open key/value metadata (connection type, remote address, user agent,
    /// originating request id).
    metadata: BTreeMap<String, String>,
}

/// Aggregate session counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Live, unexpired sessions.
    pub active: usize,
    /// Sessions created since startup.
    pub total: u64,
    /// Sessions removed by the expiry sweep since startup.
    pub expired: u64,
}

/// Interior registry state behind one lock.
#[derive(Debug, Default)]
struct RegistryInner {
    /// Live session records keyed by id.
    sessions: BTreeMap<SessionId, SessionRecord>,
    /// Cumulative created counter.
    created_total: u64,
    /// Cumulative swept-expired counter.
    expired_total: u64,
}

/// Keyed store of session records with TTL expiry.
pub struct SessionRegistry {
    /// Idle time after which a session expires.
    ttl: Duration,
    /// Guarded session table and counters.
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    /// Creates a registry with the given idle TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Creates a session and returns its unique id.
    #[must_use]
    pub fn create(&self, metadata: BTreeMap<String, String>) -> SessionId {
        self.create_at(metadata, Instant::now())
    }

    /// Creates a session at an explicit instant.
    pub(crate) fn create_at(
        &self,
        metadata: BTreeMap<String, String>,
        now: Instant,
    ) -> SessionId {
        let created_at_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        let mut inner = lock_inner(&self.inner);
        let mut id = SessionId::generate();
        // The id must be unique among live sessions.
        while inner.sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        inner.sessions.insert(
            id.clone(),
            SessionRecord {
                created_at_ms,
                last_activity: now,
                metadata,
            },
        );
        inner.created_total += 1;
        id
    }

    /// Returns true iff a live, unexpired session with this id exists.
    #[must_use]
    pub fn validate(&self, id: &SessionId) -> bool {
        self.validate_at(id, Instant::now())
    }

    /// Validates a session at an explicit instant.
    pub(crate) fn validate_at(&self, id: &SessionId, now: Instant) -> bool {
        let inner = lock_inner(&self.inner);
        inner
            .sessions
            .get(id)
            .is_some_and(|record| !self.is_expired(record, now))
    }

    /// Removes a session; returns false if it was absent.
    pub fn invalidate(&self, id: &SessionId) -> bool {
        let mut inner = lock_inner(&self.inner);
        inner.sessions.remove(id).is_some()
    }

    /// Atomically replaces a session's id with a fresh one.
    ///
    /// Metadata and creation time are preserved; the old id stops validating
    /// before this call returns. Returns `None` when the source id is absent.
    #[must_use]
    pub fn rotate(&self, id: &SessionId) -> Option<SessionId> {
        let mut inner = lock_inner(&self.inner);
        let record = inner.sessions.remove(id)?;
        let mut replacement = SessionId::generate();
        while inner.sessions.contains_key(&replacement) {
            replacement = SessionId::generate();
        }
        inner.sessions.insert(replacement.clone(), record);
        Some(replacement)
    }

    /// Returns a session's creation timestamp (milliseconds since epoch).
    #[must_use]
    pub fn created_at_ms(&self, id: &SessionId) -> Option<u128> {
        let inner = lock_inner(&self.inner);
        inner.sessions.get(id).map(|record| record.created_at_ms)
    }

    /// Returns a copy of a session's metadata.
    #[must_use]
    pub fn metadata(&self, id: &SessionId) -> Option<BTreeMap<String, String>> {
        let inner = lock_inner(&self.inner);
        inner.sessions.get(id).map(|record| record.metadata.clone())
    }

    /// Merges entries into a session's metadata; returns false if absent.
    pub fn update_metadata(&self, id: &SessionId, entries: BTreeMap<String, String>) -> bool {
        let mut inner = lock_inner(&self.inner);
        let Some(record) = inner.sessions.get_mut(id) else {
            return false;
        };
        record.metadata.extend(entries);
        record.last_activity = Instant::now();
        true
    }

    /// Refreshes a session's activity instant; returns false if absent.
    pub fn touch(&self, id: &SessionId) -> bool {
        let mut inner = lock_inner(&self.inner);
        let Some(record) = inner.sessions.get_mut(id) else {
            return false;
        };
        record.last_activity = Instant::now();
        true
    }

    /// Returns aggregate counters.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats_at(Instant::now())
    }

    /// Returns aggregate counters at an explicit instant.
    pub(crate) fn stats_at(&self, now: Instant) -> SessionStats {
        let inner = lock_inner(&self.inner);
        let active = inner
            .sessions
            .values()
            .filter(|record| !self.is_expired(record, now))
            .count();
        SessionStats {
            active,
            total: inner.created_total,
            expired: inner.expired_total,
        }
    }

    /// Removes sessions past the TTL; returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    /// Sweeps expired sessions at an explicit instant.
    pub(crate) fn cleanup_expired_at(&self, now: Instant) -> usize {
        let mut inner = lock_inner(&self.inner);
        let expired: Vec<SessionId> = inner
            .sessions
            .iter()
            .filter(|(_, record)| self.is_expired(record, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.sessions.remove(id);
        }
        inner.expired_total += u64::try_from(expired.len()).unwrap_or(u64::MAX);
        expired.len()
    }

    /// Returns whether a record is past the idle TTL.
    fn is_expired(&self, record: &SessionRecord, now: Instant) -> bool {
        now.saturating_duration_since(record.last_activity) >= self.ttl
    }
}

/// Locks the registry interior, recovering from a poisoned mutex.
fn lock_inner(inner: &Mutex<RegistryInner>) -> std::sync::MutexGuard<'_, RegistryInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
