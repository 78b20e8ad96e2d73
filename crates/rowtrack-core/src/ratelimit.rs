//! Per-service request rate limiting.
//!
//! Each collaborator owns one [`RateLimiter`], a token bucket refilled at a
//! steady rate and capped at its burst size. A request takes one token;
//! when the bucket is empty the caller sleeps until a token is due or the
//! wait timeout passes.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::settings::{RateLimitSettings, ServiceRateLimit};
use crate::status::DownloadKind;

/// Longest single sleep while waiting, so the deadline is re-checked often.
const MAX_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit for {service} not available after {waited:?}")]
    Timeout { service: String, waited: Duration },
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket shared by every request to one service.
#[derive(Debug)]
pub struct RateLimiter {
    service: String,
    rate_per_second: f64,
    burst: u32,
    wait_timeout: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A full bucket. `rate_per_second` and `burst` are expected to be
    /// validated already; non-positive values are clamped.
    pub fn new(service: impl Into<String>, limit: ServiceRateLimit, wait_timeout: Duration) -> Self {
        let burst = limit.burst.max(1);
        Self {
            service: service.into(),
            rate_per_second: limit.rate_per_second.max(f64::MIN_POSITIVE),
            burst,
            wait_timeout,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst),
                refilled_at: Instant::now(),
            }),
        }
    }

    pub fn for_kind(settings: &RateLimitSettings, kind: DownloadKind) -> Self {
        Self::new(
            kind.as_str(),
            settings.for_kind(kind),
            Duration::from_secs(settings.wait_timeout_seconds),
        )
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub const fn burst(&self) -> u32 {
        self.burst
    }

    /// Tokens currently in the bucket.
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.take().is_none()
    }

    /// Take a token, sleeping until one is due.
    ///
    /// Fails once the configured wait timeout has passed.
    pub fn acquire(&self) -> Result<(), RateLimitError> {
        let started = Instant::now();
        let deadline = started + self.wait_timeout;
        loop {
            let Some(due_in) = self.take() else {
                return Ok(());
            };
            let now = Instant::now();
            if now >= deadline {
                warn!(service = %self.service, timeout = ?self.wait_timeout, "Timed out waiting for rate limit");
                return Err(RateLimitError::Timeout {
                    service: self.service.clone(),
                    waited: started.elapsed(),
                });
            }
            debug!(service = %self.service, ?due_in, "Waiting for rate limit token");
            thread::sleep(due_in.min(deadline - now).min(MAX_SLEEP));
        }
    }

    /// Consume one token, or return how long until the next one is due.
    fn take(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate_per_second))
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = elapsed
            .mul_add(self.rate_per_second, bucket.tokens)
            .min(f64::from(self.burst));
        bucket.refilled_at = now;
    }
}
