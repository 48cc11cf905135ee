//! Token bucket implementation.
//!
//! Tokens live in a bounded channel of capacity `burst`, pre-filled at
//! construction. A background thread produces one token per refill
//! interval and drops it when the bucket is full, so the refiller never
//! blocks and tokens never queue beyond the burst size.

use crate::sync::CancelToken;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Configuration for a [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tokens produced per `period`.
    pub refill: usize,

    /// Period over which `refill` tokens are produced.
    pub period: Duration,

    /// Maximum tokens held at once; also the pre-filled amount.
    pub burst: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            refill: 1,
            period: Duration::from_secs(1),
            burst: 1,
        }
    }
}

/// A token-bucket rate limiter with a background refill thread.
///
/// ```
/// use sluice_concurrency::RateLimiter;
/// use std::time::Duration;
///
/// let limiter = RateLimiter::new(10, Duration::from_secs(1), 2);
/// assert!(limiter.try_wait());
/// assert!(limiter.try_wait());
/// // The burst is spent; the next token arrives ~100ms later.
/// assert!(!limiter.try_wait());
/// limiter.stop();
/// ```
pub struct RateLimiter {
    tokens: Receiver<()>,
    stop: Mutex<Option<Sender<()>>>,
    refiller: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter producing `refill` tokens per `period` with the
    /// given burst size.
    ///
    /// `refill` and `burst` are clamped to at least 1; the refill
    /// interval is floored at one microsecond.
    pub fn new(refill: usize, period: Duration, burst: usize) -> Self {
        Self::with_config(RateLimiterConfig {
            refill,
            period,
            burst,
        })
    }

    /// Create a limiter from a [`RateLimiterConfig`].
    pub fn with_config(config: RateLimiterConfig) -> Self {
        let refill = config.refill.max(1);
        let burst = config.burst.max(1);
        let per_token = config.period / u32::try_from(refill).unwrap_or(u32::MAX);
        let interval = per_token.max(Duration::from_micros(1));

        let (token_tx, token_rx) = bounded(burst);
        for _ in 0..burst {
            let _ = token_tx.try_send(());
        }

        info!(
            "rate limiter: {} tokens per {:?} (interval {:?}), burst {}",
            refill, config.period, interval, burst
        );

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let refiller = thread::Builder::new()
            .name("sluice-refill".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        // Dropped, not queued, when the bucket is full.
                        let _ = token_tx.try_send(());
                    }
                }
            })
            .expect("Failed to spawn refill thread");

        Self {
            tokens: token_rx,
            stop: Mutex::new(Some(stop_tx)),
            refiller: Mutex::new(Some(refiller)),
        }
    }

    /// Block until a token is available or `cancel` fires.
    ///
    /// Returns true when a token was consumed, false when the wait was
    /// cancelled or the limiter has been stopped and drained.
    pub fn wait(&self, cancel: &CancelToken) -> bool {
        select! {
            recv(self.tokens) -> token => token.is_ok(),
            recv(cancel.signal()) -> _ => false,
        }
    }

    /// Consume a token without blocking, if one is available.
    pub fn try_wait(&self) -> bool {
        self.tokens.try_recv().is_ok()
    }

    /// Tokens currently available.
    pub fn available(&self) -> usize {
        self.tokens.len()
    }

    /// Stop the refill thread.
    ///
    /// Idempotent and safe to call concurrently: exactly one caller takes
    /// the stop sender and joins the refiller. Tokens already in the
    /// bucket remain consumable.
    pub fn stop(&self) {
        let Some(sender) = self.stop.lock().take() else {
            return;
        };
        drop(sender);
        if let Some(handle) = self.refiller.lock().take() {
            let _ = handle.join();
        }
        debug!("rate limiter stopped");
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_burst_is_immediately_available() {
        let constructed = Instant::now();
        let limiter = RateLimiter::new(10, Duration::from_secs(1), 3);
        let cancel = CancelToken::new();

        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.wait(&cancel));
        }
        assert!(start.elapsed() < Duration::from_millis(50));

        // The fourth token cannot exist before one refill interval
        // (~100ms) has passed since construction.
        assert!(limiter.wait(&cancel));
        let elapsed = constructed.elapsed();
        assert!(elapsed >= Duration::from_millis(80), "elapsed {elapsed:?}");

        limiter.stop();
    }

    #[test]
    fn test_tokens_never_exceed_burst() {
        let limiter = RateLimiter::new(1000, Duration::from_secs(1), 2);
        // Let the refiller run well past the burst size.
        thread::sleep(Duration::from_millis(50));
        assert!(limiter.available() <= 2);
        limiter.stop();
    }

    #[test]
    fn test_try_wait_drains_burst() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), 2);
        assert!(limiter.try_wait());
        assert!(limiter.try_wait());
        assert!(!limiter.try_wait());
        limiter.stop();
    }

    #[test]
    fn test_wait_observes_cancellation() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), 1);
        let cancel = CancelToken::new();
        assert!(limiter.wait(&cancel));

        // The bucket is empty and refill is a minute away: only the
        // cancellation can end this wait.
        let waiter = cancel.clone();
        let limiter = Arc::new(limiter);
        let blocked = Arc::clone(&limiter);
        let handle = thread::spawn(move || blocked.wait(&waiter));

        thread::sleep(Duration::from_millis(20));
        cancel.cancel(None);
        assert!(!handle.join().unwrap());
        limiter.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let limiter = RateLimiter::new(10, Duration::from_millis(100), 1);
        limiter.stop();
        limiter.stop();

        // Concurrent stops are also fine.
        let limiter = Arc::new(RateLimiter::new(10, Duration::from_millis(100), 1));
        let other = Arc::clone(&limiter);
        let handle = thread::spawn(move || other.stop());
        limiter.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_stopped_limiter_drains_then_refuses() {
        let limiter = RateLimiter::new(10, Duration::from_secs(1), 2);
        limiter.stop();

        let cancel = CancelToken::new();
        // Pre-filled tokens survive the stop.
        assert!(limiter.wait(&cancel));
        assert!(limiter.wait(&cancel));
        // The refiller is gone and its sender dropped: wait now fails
        // fast instead of blocking forever.
        assert!(!limiter.wait(&cancel));
    }
}
