//! Per-session token buckets.
//!
//! Buckets live in a sharded map and are updated under the shard's entry
//! lock, independent of session locks, so a flood on one key never waits on
//! a slow AI call for another.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    nexza_config::RateLimitConfig,
    nexza_sessions::SessionKey,
    tracing::debug,
};

const CLEANUP_EVERY_REQUESTS: u64 = 512;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: Duration },
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: DashMap<SessionKey, Bucket>,
    requests_seen: AtomicU64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec: refill_per_sec.max(0.0),
            buckets: DashMap::new(),
            requests_seen: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.refill_per_sec)
    }

    /// Take one token for `key` if one is available.
    pub fn try_acquire(&self, key: &SessionKey) -> RateDecision {
        self.try_acquire_at(key, Instant::now())
    }

    /// Like [`try_acquire`](Self::try_acquire) with an explicit clock.
    /// A denial never consumes a token.
    pub fn try_acquire_at(&self, key: &SessionKey, now: Instant) -> RateDecision {
        if self.capacity < 1.0 {
            return RateDecision::Denied {
                retry_after: Duration::from_secs(1),
            };
        }

        let decision = match self.buckets.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let bucket = occupied.get_mut();
                self.refill(bucket, now);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    RateDecision::Allowed
                } else {
                    RateDecision::Denied {
                        retry_after: self.time_until_token(bucket.tokens),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Bucket {
                    tokens: self.capacity - 1.0,
                    refilled_at: now,
                });
                RateDecision::Allowed
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.refilled_at);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
        bucket.refilled_at = bucket.refilled_at.max(now);
    }

    fn time_until_token(&self, tokens: f64) -> Duration {
        if self.refill_per_sec <= 0.0 {
            return Duration::from_secs(3600);
        }
        let secs = ((1.0 - tokens) / self.refill_per_sec).max(0.0);
        Duration::from_secs_f64(secs.min(3600.0)).max(Duration::from_secs(1))
    }

    /// How long an untouched bucket takes to refill from empty.
    fn full_refill_period(&self) -> Duration {
        if self.refill_per_sec <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64((self.capacity / self.refill_per_sec).min(86_400.0))
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.requests_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen.is_multiple_of(CLEANUP_EVERY_REQUESTS) {
            self.sweep_idle(now);
        }
    }

    /// Drop buckets that have been idle for longer than a full refill
    /// period. Such a bucket is indistinguishable from a fresh one.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let idle_after = self.full_refill_period();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.refilled_at) <= idle_after);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "swept idle rate buckets");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
