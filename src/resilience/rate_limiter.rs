//! Per-base sliding window rate limiter.
//!
//! Each resource key (a base id) owns a window of admission timestamps.
//! At most `max_requests` admissions are granted within any rolling `window`.
//! Windows are created on first use and live as long as the limiter; they are
//! never reset implicitly.

use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Admission timestamps for one key.
#[derive(Debug, Default)]
struct RateWindow {
    admitted: VecDeque<Instant>,
}

impl RateWindow {
    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.admitted.front() {
            if now.duration_since(oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records an admission at `now`, or returns how long to wait before the
    /// oldest entry leaves the window.
    fn try_admit(&mut self, now: Instant, config: &RateLimitConfig) -> Result<(), Duration> {
        self.evict(now, config.window);
        if self.admitted.len() < config.max_requests as usize {
            self.admitted.push_back(now);
            return Ok(());
        }
        let wait = self
            .admitted
            .front()
            .map(|&oldest| (oldest + config.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        Err(wait)
    }
}

/// Outcome of a successful [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Time spent waiting for a slot.
    pub waited: Duration,
}

/// Sliding window rate limiter keyed by resource.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Arc<Mutex<RateWindow>>>>,
}

impl RateLimiter {
    /// Creates a new rate limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the limiter configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn window(&self, key: &str) -> Arc<Mutex<RateWindow>> {
        let mut windows = self.windows.lock();
        windows
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateWindow::default())))
            .clone()
    }

    /// Waits until `key` has a free slot in its window, then takes it.
    ///
    /// Cancel-safe: dropping the future before it resolves takes no slot.
    pub async fn admit(&self, key: &str) -> Admission {
        let window = self.window(key);
        let started = Instant::now();

        loop {
            let wait = {
                let mut window = window.lock();
                match window.try_admit(Instant::now(), &self.config) {
                    Ok(()) => {
                        return Admission {
                            waited: started.elapsed(),
                        }
                    }
                    Err(wait) => wait,
                }
            };

            debug!(
                key,
                wait_ms = wait.as_millis() as u64,
                "Waiting for rate window slot"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Takes a slot for `key` if one is free right now.
    pub fn try_admit(&self, key: &str) -> bool {
        let window = self.window(key);
        let mut window = window.lock();
        window.try_admit(Instant::now(), &self.config).is_ok()
    }

    /// Number of admissions for `key` still inside the current window.
    pub fn in_flight(&self, key: &str) -> usize {
        let windows = self.windows.lock();
        match windows.get(key) {
            Some(window) => {
                let mut window = window.lock();
                window.evict(Instant::now(), self.config.window);
                window.admitted.len()
            }
            None => 0,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("keys", &self.windows.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window: Duration::from_millis(window_ms),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_admission_waits_for_oldest_to_expire() {
        let limiter = limiter(5, 1000);
        let start = Instant::now();

        for _ in 0..5 {
            let admission = limiter.admit("appA").await;
            assert_eq!(admission.waited, Duration::ZERO);
        }
        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.in_flight("appA"), 5);

        let admission = limiter.admit("appA").await;
        assert_eq!(Instant::now() - start, Duration::from_secs(1));
        assert_eq!(admission.waited, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_with_staggered_admissions() {
        let limiter = limiter(2, 1000);
        let start = Instant::now();

        limiter.admit("appA").await;
        tokio::time::advance(Duration::from_millis(400)).await;
        limiter.admit("appA").await;

        // slot frees when the first admission leaves the window
        limiter.admit("appA").await;
        assert_eq!(Instant::now() - start, Duration::from_millis(1000));

        // the next one waits for the second admission at t=400ms
        limiter.admit("appA").await;
        assert_eq!(Instant::now() - start, Duration::from_millis(1400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, 1000);
        let start = Instant::now();

        limiter.admit("appA").await;
        limiter.admit("appB").await;
        assert_eq!(Instant::now(), start);

        assert!(!limiter.try_admit("appA"));
        assert_eq!(limiter.in_flight("appB"), 1);
        assert_eq!(limiter.in_flight("appC"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_admissions_never_exceed_ceiling() {
        let limiter = Arc::new(limiter(5, 1000));
        let start = Instant::now();

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.admit("appA").await;
                    Instant::now() - start
                })
            })
            .collect();

        let mut offsets = Vec::new();
        for handle in handles {
            offsets.push(handle.await.unwrap());
        }
        offsets.sort();

        // any 1s span holds at most 5 admissions
        for (i, offset) in offsets.iter().enumerate() {
            let in_window = offsets[i..]
                .iter()
                .take_while(|o| **o < *offset + Duration::from_secs(1))
                .count();
            assert!(in_window <= 5, "{} admissions within 1s of {:?}", in_window, offset);
        }
        assert_eq!(offsets[4], Duration::ZERO);
        assert_eq!(offsets[5], Duration::from_secs(1));
        assert_eq!(offsets[10], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_admit_refills_after_window() {
        let limiter = limiter(1, 500);

        assert!(limiter.try_admit("appA"));
        assert!(!limiter.try_admit("appA"));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_admit("appA"));
    }
}
