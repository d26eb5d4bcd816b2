//! Pacing Engine
//!
//! - [`RateLimiter`]: interval math (rate -> base interval, uniform jitter)
//! - [`Ticker`]: background task that turns intervals into ticks
//!
//! The ticker's queue holds a single tick. When the consumer has not taken
//! the previous tick yet, the new one is dropped and counted, so a slow
//! channel falls behind by at most one record instead of building a backlog.

use rand::prelude::*;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Interval used when the configured rate is not positive
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Longest interval ever produced; slower rates are clamped to it
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Floor applied by the ticker so a 100% jitter draw cannot spin
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Computes jittered inter-record intervals from a calls-per-minute rate
pub struct RateLimiter {
    calls_per_minute: f64,
    jitter_percent: f64,
    rng: StdRng,
}

impl RateLimiter {
    pub fn new(calls_per_minute: f64, jitter_percent: f64) -> Self {
        Self {
            calls_per_minute,
            jitter_percent,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Rate limiter with a reproducible jitter sequence
    pub fn seeded(calls_per_minute: f64, jitter_percent: f64, seed: u64) -> Self {
        Self {
            calls_per_minute,
            jitter_percent,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn calls_per_minute(&self) -> f64 {
        self.calls_per_minute
    }

    pub fn jitter_percent(&self) -> f64 {
        self.jitter_percent
    }

    pub fn set_calls_per_minute(&mut self, calls_per_minute: f64) {
        self.calls_per_minute = calls_per_minute;
    }

    pub fn set_jitter_percent(&mut self, jitter_percent: f64) {
        self.jitter_percent = jitter_percent;
    }

    /// Interval without jitter: one minute divided by the rate, capped at
    /// [`MAX_INTERVAL`]
    pub fn base_interval(&self) -> Duration {
        if self.calls_per_minute <= 0.0 || !self.calls_per_minute.is_finite() {
            return DEFAULT_INTERVAL;
        }
        Duration::try_from_secs_f64(60.0 / self.calls_per_minute)
            .map_or(MAX_INTERVAL, |d| d.min(MAX_INTERVAL))
    }

    /// Next interval: base plus an independent uniform offset within
    /// `[-jitter%, +jitter%]` of the base
    pub fn next_interval(&mut self) -> Duration {
        let base = self.base_interval();
        if self.jitter_percent <= 0.0 || self.calls_per_minute <= 0.0 {
            return base;
        }

        let bound = self.jitter_percent / 100.0;
        let factor = self.rng.random_range(-bound..=bound);
        let secs = base.as_secs_f64() * (1.0 + factor);
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(base)
    }
}

/// Recurring trigger driven by a [`RateLimiter`].
///
/// Spawns its pacing task on creation; the task ends when the ticker is
/// stopped or dropped.
pub struct Ticker {
    rx: mpsc::Receiver<Instant>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

impl Ticker {
    /// Start pacing on the current tokio runtime
    pub fn spawn(mut limiter: RateLimiter) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));

        let token = cancel.clone();
        let dropped_count = dropped.clone();
        tokio::spawn(async move {
            loop {
                let interval = limiter.next_interval().max(MIN_TICK_INTERVAL);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match tx.try_send(Instant::now()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let total = dropped_count.fetch_add(1, Ordering::Relaxed) + 1;
                        trace!(dropped = total, "tick not consumed, skipping");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        });

        Self {
            rx,
            cancel,
            dropped,
        }
    }

    /// Wait for the next tick; `None` once the ticker has stopped
    pub async fn tick(&mut self) -> Option<Instant> {
        self.rx.recv().await
    }

    /// Ticks discarded because the previous one was still pending
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_interval_without_jitter() {
        let mut limiter = RateLimiter::new(60.0, 0.0);
        for _ in 0..100 {
            assert_eq!(limiter.next_interval(), Duration::from_secs(1));
        }

        let mut limiter = RateLimiter::new(120.0, 0.0);
        assert_eq!(limiter.next_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_non_positive_rate_uses_default() {
        let mut limiter = RateLimiter::new(0.0, 50.0);
        assert_eq!(limiter.next_interval(), DEFAULT_INTERVAL);

        let mut limiter = RateLimiter::new(-3.0, 0.0);
        assert_eq!(limiter.next_interval(), DEFAULT_INTERVAL);
    }

    #[test]
    fn test_extreme_rates_are_clamped() {
        let mut limiter = RateLimiter::new(1e-20, 0.0);
        assert_eq!(limiter.next_interval(), MAX_INTERVAL);

        let mut limiter = RateLimiter::new(f64::MIN_POSITIVE, 100.0);
        assert!(limiter.next_interval() <= MAX_INTERVAL * 2);

        // One call a week still paces at the cap
        let limiter = RateLimiter::new(1.0 / (7.0 * 24.0 * 60.0), 0.0);
        assert_eq!(limiter.base_interval(), MAX_INTERVAL);

        let mut limiter = RateLimiter::new(f64::MAX, 0.0);
        assert_eq!(limiter.next_interval(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_survives_tiny_rate() {
        let mut ticker = Ticker::spawn(RateLimiter::new(1e-20, 0.0));
        let start = Instant::now();

        let first = ticker.tick().await.unwrap();
        assert_eq!(first - start, MAX_INTERVAL);
    }

    #[test]
    fn test_jitter_bounds_and_mean() {
        let mut limiter = RateLimiter::seeded(60.0, 20.0, 42);
        let lower = Duration::from_millis(800);
        let upper = Duration::from_millis(1200);

        let samples = 10_000;
        let mut total = 0.0;
        let mut distinct = std::collections::HashSet::new();
        for _ in 0..samples {
            let interval = limiter.next_interval();
            assert!(
                interval >= lower && interval <= upper,
                "interval {:?} outside jitter bounds",
                interval
            );
            total += interval.as_secs_f64();
            distinct.insert(interval.as_nanos());
        }

        let mean = total / samples as f64;
        assert!((mean - 1.0).abs() < 0.01, "mean {} too far from base", mean);
        assert!(distinct.len() > samples / 2);
    }

    #[test]
    fn test_rate_can_be_retuned() {
        let mut limiter = RateLimiter::new(60.0, 0.0);
        limiter.set_calls_per_minute(30.0);
        assert_eq!(limiter.next_interval(), Duration::from_secs(2));
        assert_eq!(limiter.calls_per_minute(), 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_fires_at_rate() {
        let mut ticker = Ticker::spawn(RateLimiter::new(60.0, 0.0));
        let start = Instant::now();

        let first = ticker.tick().await.unwrap();
        let second = ticker.tick().await.unwrap();

        assert_eq!(first - start, Duration::from_secs(1));
        assert_eq!(second - first, Duration::from_secs(1));
        assert_eq!(ticker.dropped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconsumed_ticks_are_dropped() {
        let mut ticker = Ticker::spawn(RateLimiter::new(60.0, 0.0));
        let start = Instant::now();

        tokio::time::sleep(Duration::from_millis(5_500)).await;

        // Only the first tick was queued; 2s..5s were discarded
        let pending = ticker.tick().await.unwrap();
        assert_eq!(pending - start, Duration::from_secs(1));
        assert_eq!(ticker.dropped(), 4);

        let next = ticker.tick().await.unwrap();
        assert_eq!(next - start, Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_ticker_ends() {
        let mut ticker = Ticker::spawn(RateLimiter::new(60.0, 0.0));
        ticker.stop();
        assert!(ticker.tick().await.is_none());
    }
}
