// crates/cloudgate-mcp/src/ratelimit.rs
// ============================================================================
// Module: Request Rate Limiter
// Description: Token-bucket rate limiting keyed by client address.
// Purpose: Bound per-client request rates ahead of parsing and dispatch.
// Dependencies: cloudgate-config
// ============================================================================

//! ## Overview
//! Token-bucket limiter keyed by peer IP. Each bucket holds `max_requests`
//! tokens and refills linearly over `window_ms`. The entry table is bounded at
//! `max_entries`; admitting a new client above the bound evicts the stalest
//! bucket. A full-bucket client therefore bursts up to `max_requests` and then
//! sustains `max_requests` per window.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::RateLimitConfig;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Suggested retry delay in milliseconds when refused.
    pub retry_after_ms: Option<u64>,
}

impl RateLimitDecision {
    /// Decision admitting the request.
    const ALLOWED: Self = Self {
        allowed: true,
        retry_after_ms: None,
    };
}

/// Per-client token bucket state.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Remaining whole tokens.
    tokens: u32,
    /// Instant the bucket last accounted a refill.
    refilled_at: Instant,
    /// Instant the bucket was last touched (eviction ordering).
    touched_at: Instant,
}

/// Token-bucket rate limiter keyed by peer IP.
///
/// # Invariants
/// - The bucket table never holds more than `max_entries` entries.
pub struct RateLimiter {
    /// Active limiter settings.
    config: RateLimitConfig,
    /// Bucket table guarded for multi-threaded transport handlers.
    buckets: Mutex<BTreeMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    /// Creates a limiter from validated configuration.
    #[must_use]
    pub const fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Checks and consumes one token for the client.
    #[must_use]
    pub fn check(&self, key: IpAddr) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Checks and consumes one token at an explicit instant.
    pub(crate) fn check_at(&self, key: IpAddr, now: Instant) -> RateLimitDecision {
        let Ok(mut buckets) = self.buckets.lock() else {
            // A poisoned table fails open for availability; the bucket state
            // resets on the next successful lock.
            return RateLimitDecision::ALLOWED;
        };
        if !buckets.contains_key(&key) && buckets.len() >= self.config.max_entries {
            evict_stalest(&mut buckets);
        }
        let bucket = buckets.entry(key).or_insert(Bucket {
            tokens: self.config.max_requests,
            refilled_at: now,
            touched_at: now,
        });
        bucket.touched_at = now;
        let elapsed_ms = u64::try_from(
            now.saturating_duration_since(bucket.refilled_at).as_millis(),
        )
        .unwrap_or(u64::MAX);
        let refill = elapsed_ms
            .saturating_mul(u64::from(self.config.max_requests))
            .checked_div(self.config.window_ms)
            .unwrap_or(0);
        if refill > 0 {
            let refill_capped =
                u32::try_from(refill.min(u64::from(self.config.max_requests))).unwrap_or(u32::MAX);
            bucket.tokens = bucket.tokens.saturating_add(refill_capped).min(self.config.max_requests);
            bucket.refilled_at = now;
        }
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            return RateLimitDecision::ALLOWED;
        }
        RateLimitDecision {
            allowed: false,
            retry_after_ms: Some(self.ms_per_token()),
        }
    }

    /// Returns the approximate refill time for a single token.
    fn ms_per_token(&self) -> u64 {
        self.config
            .window_ms
            .checked_div(u64::from(self.config.max_requests))
            .unwrap_or(self.config.window_ms)
            .max(1)
    }
}

/// Removes the least recently touched bucket.
fn evict_stalest(buckets: &mut BTreeMap<IpAddr, Bucket>) {
    let stalest = buckets
        .iter()
        .min_by_key(|(_, bucket)| bucket.touched_at)
        .map(|(key, _)| *key);
    if let Some(key) = stalest {
        buckets.remove(&key);
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
