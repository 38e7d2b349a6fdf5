//! Per-identity request throttling.
//!
//! Token buckets keyed by `user:<id>` or `ip:<address>`, refilled at
//! `requests_per_minute / 60` permits per second and holding at most one
//! second worth of permits. Buckets are created on first use and live until
//! [`RateLimiter::reset`]; nothing evicts them, so the map grows with the
//! number of distinct callers.

use crate::config::RateLimitSettings;
use crate::identity::Owner;
use crate::model::OwnerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone)]
struct TokenBucket {
    permits: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    fn new(requests_per_minute: u32, now: Instant) -> Self {
        let refill_per_sec = f64::from(requests_per_minute) / 60.0;
        let capacity = if requests_per_minute == 0 {
            0.0
        } else {
            refill_per_sec.max(1.0)
        };
        Self {
            permits: capacity,
            capacity,
            refill_per_sec,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.permits = (self.permits + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.permits >= 1.0 {
            self.permits -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Shared token-bucket limiter.
///
/// The whole map sits behind one mutex, so looking up a key and creating its
/// bucket is atomic and two first requests for the same key share one bucket.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one permit for `key` without blocking.
    ///
    /// `requests_per_minute` only shapes a bucket when it is first created;
    /// a budget of 0 denies every call.
    pub fn allow(&self, key: &str, requests_per_minute: u32) -> bool {
        self.allow_at(key, requests_per_minute, Instant::now())
    }

    fn allow_at(&self, key: &str, requests_per_minute: u32, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(requests_per_minute, now))
            .try_acquire(now)
    }

    /// Drop the bucket for `key`; the next call starts from a full bucket.
    pub fn reset(&self, key: &str) {
        self.buckets.lock().remove(key);
    }

    /// Number of keys currently holding a bucket.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }
}

pub fn user_key(owner: OwnerId) -> String {
    format!("user:{}", owner)
}

pub fn ip_key(address: &str) -> String {
    format!("ip:{}", address)
}

/// Client address: first `X-Forwarded-For` entry, else the peer IP.
pub fn client_address(forwarded_for: Option<&str>, peer: Option<SocketAddr>) -> String {
    forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Chooses which buckets a call is charged against.
#[derive(Debug)]
pub struct RateLimitPolicy {
    limiter: RateLimiter,
    settings: RateLimitSettings,
}

impl RateLimitPolicy {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            limiter: RateLimiter::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Whether the call may proceed.
    ///
    /// The authenticated owner's bucket is tried first; the IP bucket is
    /// only charged when there is no owner or the owner's bucket is empty.
    pub fn check(&self, owner: Option<&Owner>, client_address: &str) -> bool {
        if !self.settings.enabled {
            return true;
        }

        if let Some(owner) = owner {
            let rpm = owner
                .rate_limit_per_minute
                .unwrap_or(self.settings.default_user_requests_per_minute);
            if self.limiter.allow(&user_key(owner.id), rpm) {
                return true;
            }
        }

        let allowed = self
            .limiter
            .allow(&ip_key(client_address), self.settings.ip_requests_per_minute);
        if !allowed {
            warn!(
                owner = ?owner.map(|o| o.id),
                client = %client_address,
                "Rate limit exceeded"
            );
        }
        allowed
    }

    pub fn reset_owner(&self, owner: OwnerId) {
        self.limiter.reset(&user_key(owner));
    }

    pub fn reset_ip(&self, address: &str) {
        self.limiter.reset(&ip_key(address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn owner(id: u64, rpm: u32) -> Owner {
        Owner {
            id: OwnerId(id),
            username: format!("user{}", id),
            rate_limit_per_minute: Some(rpm),
        }
    }

    #[test]
    fn test_sustained_excess_is_denied() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        let results: Vec<bool> = (0..61)
            .map(|i| limiter.allow_at("user:1", 60, start + Duration::from_millis(i * 10)))
            .collect();

        assert!(results[0]);
        assert!(results.iter().any(|allowed| !allowed));
    }

    #[test]
    fn test_burst_is_one_second_of_permits() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        // 600 rpm = 10 permits/s
        let granted = (0..20).filter(|_| limiter.allow_at("k", 600, now)).count();
        assert_eq!(granted, 10);
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        assert!(limiter.allow_at("k", 60, start));
        assert!(!limiter.allow_at("k", 60, start + Duration::from_millis(500)));
        assert!(limiter.allow_at("k", 60, start + Duration::from_millis(1000)));

        // idle time does not accumulate beyond capacity
        let later = start + Duration::from_secs(60);
        assert!(limiter.allow_at("k", 60, later));
        assert!(!limiter.allow_at("k", 60, later));
    }

    #[test]
    fn test_reset_restores_full_bucket() {
        let limiter = RateLimiter::new();
        while limiter.allow("ip:10.0.0.1", 60) {}

        limiter.reset("ip:10.0.0.1");
        assert!(limiter.allow("ip:10.0.0.1", 60));
    }

    #[test]
    fn test_zero_budget_denies() {
        let limiter = RateLimiter::new();
        assert!(!limiter.allow("k", 0));
    }

    #[test]
    fn test_keys_are_independent_and_tracked() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("user:1", 60));
        assert!(!limiter.allow("user:1", 60));
        assert!(limiter.allow("user:2", 60));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_concurrent_first_use_shares_one_bucket() {
        let limiter = Arc::new(RateLimiter::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.allow("user:fresh", 60))
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(granted, 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_client_address() {
        let peer: SocketAddr = "192.168.1.5:4000".parse().unwrap();
        assert_eq!(
            client_address(Some("203.0.113.7, 10.0.0.1"), Some(peer)),
            "203.0.113.7"
        );
        assert_eq!(client_address(Some("  "), Some(peer)), "192.168.1.5");
        assert_eq!(client_address(None, Some(peer)), "192.168.1.5");
        assert_eq!(client_address(None, None), "unknown");
    }

    #[test]
    fn test_policy_prefers_owner_bucket() {
        let policy = RateLimitPolicy::new(RateLimitSettings {
            ip_requests_per_minute: 60,
            ..RateLimitSettings::default()
        });
        let alice = owner(1, 120);

        // owner passes: IP bucket untouched
        assert!(policy.check(Some(&alice), "10.0.0.1"));
        assert!(policy.check(Some(&alice), "10.0.0.1"));
        assert_eq!(policy.limiter().tracked_keys(), 1);

        // owner bucket drained: falls through to the IP bucket once
        while policy.limiter().allow(&user_key(alice.id), 120) {}
        assert!(policy.check(Some(&alice), "10.0.0.1"));
        assert!(!policy.check(Some(&alice), "10.0.0.1"));

        policy.reset_owner(alice.id);
        assert!(policy.check(Some(&alice), "10.0.0.1"));
    }

    #[test]
    fn test_policy_anonymous_uses_ip() {
        let policy = RateLimitPolicy::new(RateLimitSettings::default());
        assert!(policy.check(None, "10.0.0.9"));
        assert!(!policy.check(None, "10.0.0.9"));
        assert!(policy.check(None, "10.0.0.10"));

        policy.reset_ip("10.0.0.9");
        assert!(policy.check(None, "10.0.0.9"));
    }

    #[test]
    fn test_policy_disabled() {
        let policy = RateLimitPolicy::new(RateLimitSettings {
            enabled: false,
            ip_requests_per_minute: 0,
            ..RateLimitSettings::default()
        });
        assert!(policy.check(None, "10.0.0.1"));
        assert_eq!(policy.limiter().tracked_keys(), 0);
    }
}
