//! Rate limiting middleware
//!
//! Sliding-window log: each bucket keeps the raw admission timestamps of the
//! current window. Timestamps at least one window old are pruned before each
//! check, so a check is O(window size).

use super::{Middleware, Next};
use crate::router::Router;
use crate::{Request, Response};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const DEFAULT_KEY_HEADER: &str = "X-User-ID";
pub const ANONYMOUS_KEY: &str = "anonymous";

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Time until the oldest entry leaves the window; zero when admitted
    pub retry_after: Duration,
}

impl RateLimitDecision {
    /// `Retry-After` value in whole seconds, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    max_requests: usize,
    length: Duration,
}

impl Window {
    fn admit(&self, log: &mut VecDeque<Instant>, now: Instant) -> RateLimitDecision {
        while let Some(oldest) = log.front() {
            if now.duration_since(*oldest) >= self.length {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() < self.max_requests {
            log.push_back(now);
            return RateLimitDecision {
                allowed: true,
                limit: self.max_requests,
                remaining: self.max_requests - log.len(),
                retry_after: Duration::ZERO,
            };
        }

        let retry_after = log
            .front()
            .map(|oldest| self.length.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(self.length);
        RateLimitDecision {
            allowed: false,
            limit: self.max_requests,
            remaining: 0,
            retry_after,
        }
    }
}

/// One sliding window shared by every caller
#[derive(Debug)]
pub struct RateLimiter {
    window: Window,
    log: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            window: Window {
                max_requests,
                length: window,
            },
            log: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn per_second(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn check(&self) -> RateLimitDecision {
        self.check_at(Instant::now())
    }

    pub fn check_at(&self, now: Instant) -> RateLimitDecision {
        self.window.admit(&mut self.log.lock(), now)
    }
}

#[derive(Debug)]
struct Buckets {
    logs: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl Buckets {
    fn sweep(&mut self, now: Instant, length: Duration) {
        self.logs.retain(|_, log| {
            log.back()
                .is_some_and(|newest| now.duration_since(*newest) < length)
        });
        self.last_sweep = now;
    }
}

/// One sliding window per caller key.
///
/// Idle buckets are swept during checks, at most once per window length, so
/// the map holds only keys seen within roughly the last two windows.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    window: Window,
    buckets: Mutex<Buckets>,
}

impl KeyedRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            window: Window {
                max_requests,
                length: window,
            },
            buckets: Mutex::new(Buckets {
                logs: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut buckets = self.buckets.lock();
        if now.duration_since(buckets.last_sweep) >= self.window.length {
            buckets.sweep(now, self.window.length);
        }
        let log = buckets.logs.entry(key.to_string()).or_default();
        self.window.admit(log, now)
    }

    /// Drop buckets whose every entry has left the window
    pub fn prune_idle(&self, now: Instant) {
        self.buckets.lock().sweep(now, self.window.length);
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().logs.len()
    }
}

fn stamp_remaining(res: &mut Response, decision: &RateLimitDecision) {
    res.headers
        .set("X-RateLimit-Limit", decision.limit.to_string());
    res.headers
        .set("X-RateLimit-Remaining", decision.remaining.to_string());
}

/// Global rate limit middleware
#[derive(Debug)]
pub struct RateLimit {
    limiter: RateLimiter,
}

impl RateLimit {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            limiter: RateLimiter::new(max_requests, window),
        }
    }
}

impl Middleware for RateLimit {
    fn name(&self) -> &str {
        "global-rate-limit"
    }

    fn handle<'a>(
        &'a self,
        req: Request,
        router: &'a Router,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let decision = self.limiter.check();
            if !decision.allowed {
                return Response::too_many_requests(
                    "Rate limit exceeded",
                    decision.retry_after_secs(),
                    decision.limit,
                );
            }
            let mut res = next.run(req, router).await;
            stamp_remaining(&mut res, &decision);
            res
        })
    }
}

/// Per-caller rate limit middleware, keyed on a request header.
///
/// Callers without the header all share the `"anonymous"` bucket.
#[derive(Debug)]
pub struct KeyedRateLimit {
    limiter: KeyedRateLimiter,
    key_header: String,
}

impl KeyedRateLimit {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            limiter: KeyedRateLimiter::new(max_requests, window),
            key_header: DEFAULT_KEY_HEADER.to_string(),
        }
    }

    pub fn key_header(mut self, header: impl Into<String>) -> Self {
        self.key_header = header.into();
        self
    }

    pub fn limiter(&self) -> &KeyedRateLimiter {
        &self.limiter
    }

    fn key<'r>(&self, req: &'r Request) -> &'r str {
        req.header(&self.key_header).unwrap_or(ANONYMOUS_KEY)
    }
}

impl Middleware for KeyedRateLimit {
    fn name(&self) -> &str {
        "per-user-rate-limit"
    }

    fn handle<'a>(
        &'a self,
        req: Request,
        router: &'a Router,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let key = self.key(&req);
            let decision = self.limiter.check(key);
            if !decision.allowed {
                tracing::debug!(key, "per-key rate limit exceeded");
                return Response::too_many_requests(
                    &format!("Rate limit exceeded for user: {key}"),
                    decision.retry_after_secs(),
                    decision.limit,
                );
            }
            let mut res = next.run(req, router).await;
            stamp_remaining(&mut res, &decision);
            res
        })
    }
}
