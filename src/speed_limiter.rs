//! Transfer speed limiting using a token bucket
//!
//! One limiter is shared across every concurrent transfer stream; all
//! streams draw from the same bucket, which distributes bandwidth by
//! demand. Implements `sync.transferSpeedMax` (0 = unlimited).
//!
//! Tokens are bytes. They refill at the configured rate; a stream
//! acquires tokens before reading each chunk and waits when the bucket is
//! empty. Tracking is lock-free (atomics); waiting is a capped sleep so
//! dynamic limit changes take effect promptly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global transfer speed limiter shared across all streams
#[derive(Clone)]
pub struct SpeedLimiter {
    /// Limit in bytes per second (0 = unlimited)
    limit_bps: Arc<AtomicU64>,
    /// Available tokens (bytes that may be transferred now)
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since an arbitrary epoch)
    last_refill: Arc<AtomicU64>,
}

impl SpeedLimiter {
    /// Create a limiter; 0 means unlimited
    #[must_use]
    pub fn new(limit_bps: u64) -> Self {
        Self {
            limit_bps: Arc::new(AtomicU64::new(limit_bps)),
            tokens: Arc::new(AtomicU64::new(limit_bps)),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Change the limit; takes effect immediately
    pub fn set_limit(&self, limit_bps: u64) {
        let old_limit = self.limit_bps.swap(limit_bps, Ordering::SeqCst);
        if limit_bps > old_limit {
            self.tokens.fetch_add(limit_bps - old_limit, Ordering::SeqCst);
        }
    }

    /// Current limit in bytes per second; None if unlimited
    pub fn limit(&self) -> Option<u64> {
        let limit = self.limit_bps.load(Ordering::Relaxed);
        (limit != 0).then_some(limit)
    }

    /// Acquire permission to transfer `bytes` (async callers)
    ///
    /// Waits until sufficient tokens are available. Returns immediately
    /// when unlimited.
    pub async fn acquire(&self, bytes: u64) {
        loop {
            match self.try_take(bytes) {
                Taken::All => return,
                Taken::Wait(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Acquire permission to transfer `bytes` from a blocking worker thread
    ///
    /// The SFTP streams run under `spawn_blocking` and cannot await; they
    /// throttle with a plain sleep instead.
    pub fn acquire_blocking(&self, bytes: u64) {
        loop {
            match self.try_take(bytes) {
                Taken::All => return,
                Taken::Wait(wait) => std::thread::sleep(wait),
            }
        }
    }

    /// Consume up to `bytes` tokens; reports how long to wait for the rest
    fn try_take(&self, bytes: u64) -> Taken {
        if bytes == 0 {
            return Taken::All;
        }

        let mut remaining = bytes;
        loop {
            // Re-read the limit each iteration so dynamic changes apply
            let limit = self.limit_bps.load(Ordering::Relaxed);
            if limit == 0 {
                return Taken::All;
            }

            self.refill_tokens();

            let current = self.tokens.load(Ordering::SeqCst);
            let to_consume = remaining.min(current);

            if to_consume > 0 {
                if self
                    .tokens
                    .compare_exchange(
                        current,
                        current - to_consume,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    remaining -= to_consume;
                    if remaining == 0 {
                        return Taken::All;
                    }
                }
                // CAS lost or tokens remain to take — retry immediately
                continue;
            }

            // Empty bucket: wait roughly long enough for the refill, capped
            // at 100ms so limit changes are picked up quickly
            let wait_ms = (remaining as f64 / limit as f64 * 1000.0) as u64;
            return Taken::Wait(Duration::from_millis(wait_ms.clamp(10, 100)));
        }
    }

    /// Refill tokens based on elapsed time since the last refill
    fn refill_tokens(&self) {
        let limit = self.limit_bps.load(Ordering::Relaxed);
        if limit == 0 {
            return;
        }

        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;
        let tokens_to_add = (limit as f64 * elapsed_secs) as u64;

        if tokens_to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            // Cap at one second's worth of tokens (bucket capacity)
            let current = self.tokens.load(Ordering::SeqCst);
            let new_tokens = (current + tokens_to_add).min(limit);
            self.tokens.store(new_tokens, Ordering::SeqCst);
        }
    }

    fn now_nanos() -> u64 {
        use std::sync::OnceLock;
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = EPOCH.get_or_init(Instant::now);
        epoch.elapsed().as_nanos() as u64
    }
}

enum Taken {
    All,
    Wait(Duration),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_limiter_never_waits() {
        let limiter = SpeedLimiter::new(0);
        let start = Instant::now();
        limiter.acquire(100 * 1024 * 1024).await;
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(limiter.limit(), None);
    }

    #[tokio::test]
    async fn limited_acquire_throttles_beyond_the_bucket() {
        // 1 MB/s bucket; the initial bucket holds 1 MB, so a second MB
        // must wait for refill
        let limiter = SpeedLimiter::new(1024 * 1024);
        limiter.acquire(1024 * 1024).await;

        let start = Instant::now();
        limiter.acquire(200 * 1024).await;
        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "second acquire must wait for tokens to refill"
        );
    }

    #[test]
    fn blocking_acquire_throttles_too() {
        let limiter = SpeedLimiter::new(1024 * 1024);
        limiter.acquire_blocking(1024 * 1024);

        let start = Instant::now();
        limiter.acquire_blocking(150 * 1024);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn removing_the_limit_mid_wait_unblocks() {
        let limiter = SpeedLimiter::new(1000);
        limiter.acquire(1000).await;

        let limiter_clone = limiter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            limiter_clone.set_limit(0);
        });

        // Would take ~10s at 1000 B/s; the limit removal must cut it short
        let start = Instant::now();
        limiter.acquire(10_000).await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn raising_the_limit_adds_tokens() {
        let limiter = SpeedLimiter::new(100);
        limiter.set_limit(10_000);
        assert_eq!(limiter.limit(), Some(10_000));

        let start = Instant::now();
        limiter.acquire_blocking(5_000);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
