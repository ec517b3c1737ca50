// crates/cloudgate-mcp/src/connection.rs
// ============================================================================
// Module: Connection Tracker
// Description: Bounded set of live stream writer handles.
// Purpose: Enforce the concurrent-connection cap and drive shutdown teardown.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! Every live SSE stream registers its writer task's abort handle here from
//! the moment headers are flushed until the stream closes. Registration is an
//! atomic check-and-insert against the configured cap, so the tracked set can
//! never exceed it. Shutdown aborts every unfinished writer and clears the
//! set before the listener is released.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tokio::task::AbortHandle;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Identifier for a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream flavor for a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Long-lived `GET /sse` stream.
    Sse,
    /// Single-use SSE response to a POST request.
    SseRequest,
}

impl ConnectionKind {
    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::SseRequest => "sse-request",
        }
    }
}

/// Tracked writer state for a live stream.
#[derive(Debug)]
struct TrackedConnection {
    /// Stream flavor.
    kind: ConnectionKind,
    /// Abort handle for the stream's writer task. A finished task is the
    /// already-ended case and is skipped at shutdown.
    abort: AbortHandle,
    /// Registration timestamp (milliseconds since epoch).
    established_at_ms: u128,
}

/// Admission failure when the connection cap is reached.
#[derive(Debug, Error)]
#[error("connection limit reached")]
pub struct CapacityError;

/// Bounded registry of live stream connections.
///
/// # Invariants
/// - The tracked set never holds more than `max_connections` entries.
pub struct ConnectionTracker {
    /// Maximum concurrently tracked connections.
    max_connections: usize,
    /// Monotonic id source.
    next_id: AtomicU64,
    /// Guarded connection table.
    inner: Mutex<BTreeMap<ConnectionId, TrackedConnection>>,
}

impl ConnectionTracker {
    /// Creates a tracker with the given connection cap.
    #[must_use]
    pub const fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers a live stream writer; refused at the cap.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError`] when the tracked set is full.
    pub fn register(
        &self,
        kind: ConnectionKind,
        abort: AbortHandle,
    ) -> Result<ConnectionId, CapacityError> {
        let established_at_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        let mut inner = lock_inner(&self.inner);
        if inner.len() >= self.max_connections {
            return Err(CapacityError);
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        inner.insert(
            id,
            TrackedConnection {
                kind,
                abort,
                established_at_ms,
            },
        );
        Ok(id)
    }

    /// Returns whether another stream can currently be admitted.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        lock_inner(&self.inner).len() < self.max_connections
    }

    /// Removes a connection from the tracked set; idempotent.
    pub fn release(&self, id: ConnectionId) -> bool {
        lock_inner(&self.inner).remove(&id).is_some()
    }

    /// Returns the number of currently tracked connections.
    #[must_use]
    pub fn active(&self) -> usize {
        lock_inner(&self.inner).len()
    }

    /// Returns the stream kind for a tracked connection.
    #[must_use]
    pub fn kind(&self, id: ConnectionId) -> Option<ConnectionKind> {
        lock_inner(&self.inner).get(&id).map(|entry| entry.kind)
    }

    /// Returns the registration timestamp for a tracked connection.
    #[must_use]
    pub fn established_at_ms(&self, id: ConnectionId) -> Option<u128> {
        lock_inner(&self.inner).get(&id).map(|entry| entry.established_at_ms)
    }

    /// Ends every tracked stream and clears the set.
    ///
    /// Writers that already finished are skipped; the rest are aborted, which
    /// drops their event senders and terminates the client streams.
    pub fn close_all(&self) -> usize {
        let mut inner = lock_inner(&self.inner);
        let count = inner.len();
        for entry in inner.values() {
            if !entry.abort.is_finished() {
                entry.abort.abort();
            }
        }
        inner.clear();
        count
    }
}

/// Locks the connection table, recovering from a poisoned mutex.
fn lock_inner(
    inner: &Mutex<BTreeMap<ConnectionId, TrackedConnection>>,
) -> std::sync::MutexGuard<'_, BTreeMap<ConnectionId, TrackedConnection>> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
