//! Request pacing for the market-data API.
//!
//! Two limits are enforced together: a sliding-window budget (default 60
//! calls per rolling 60 s) and a minimum spacing between consecutive calls
//! (default 1.1 s). The spacing alone keeps the burst rate far below the
//! provider's 30 calls/second hard cap; the window guarantees the
//! per-minute budget even if the spacing is configured lower.
//!
//! Built on `tokio::time`, so tests drive it with a paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Default per-window budget (Finnhub free tier).
pub const DEFAULT_MAX_REQUESTS: u64 = 60;

/// Default sliding window duration.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default spacing between consecutive calls.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1100);

struct WindowState {
    timestamps: VecDeque<Instant>,
    last: Option<Instant>,
}

/// Sliding-window rate limiter with a minimum inter-call interval.
///
/// Tracks timestamps of recent requests in a `VecDeque` behind a tokio Mutex.
/// `acquire()` sleeps until both the window has room and the spacing since
/// the previous call has elapsed.
pub struct RateLimiter {
    state: Mutex<WindowState>,
    max_requests: u64,
    window_duration: Duration,
    min_interval: Duration,
    tracker: RequestTracker,
}

impl RateLimiter {
    /// Create a rate limiter with explicit budget, window, and spacing.
    pub fn new(max_requests: u64, window_duration: Duration, min_interval: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState {
                timestamps: VecDeque::with_capacity(max_requests as usize),
                last: None,
            }),
            max_requests: max_requests.max(1),
            window_duration,
            min_interval,
            tracker: RequestTracker::new(),
        }
    }

    /// Wait until a request slot is available, then record the timestamp.
    pub async fn acquire(&self) {
        loop {
            let now = Instant::now();
            let mut st = self.state.lock().await;

            if let Some(cutoff) = now.checked_sub(self.window_duration) {
                while st.timestamps.front().is_some_and(|&t| t <= cutoff) {
                    st.timestamps.pop_front();
                }
            }

            let spacing_wait = st
                .last
                .map(|last| (last + self.min_interval).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO);

            let window_wait = if (st.timestamps.len() as u64) < self.max_requests {
                Duration::ZERO
            } else {
                match st.timestamps.front() {
                    Some(&oldest) => (oldest + self.window_duration).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            let wait = spacing_wait.max(window_wait);
            if wait.is_zero() {
                st.timestamps.push_back(now);
                st.last = Some(now);
                return;
            }

            // Drop lock before sleeping
            drop(st);
            sleep(wait).await;
        }
    }

    /// Non-blocking snapshot of remaining request budget in the current window.
    ///
    /// Returns `None` if the lock is contended (callers should treat as "unknown").
    pub fn remaining_budget(&self) -> Option<u64> {
        match self.state.try_lock() {
            Ok(st) => {
                let now = Instant::now();
                let active = match now.checked_sub(self.window_duration) {
                    Some(cutoff) => st.timestamps.iter().filter(|&&t| t > cutoff).count(),
                    None => st.timestamps.len(),
                } as u64;
                Some(self.max_requests.saturating_sub(active))
            }
            Err(_) => None,
        }
    }

    /// Access the request tracker for recording outcomes.
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// The configured max requests per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW, DEFAULT_MIN_INTERVAL)
    }
}

/// Atomic counters tracking API request outcomes.
pub struct RequestTracker {
    requests_made: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_rate_limited: AtomicU64,
    requests_failed: AtomicU64,
}

impl RequestTracker {
    fn new() -> Self {
        Self {
            requests_made: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_rate_limited: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current counters.
    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            requests_made: self.requests_made.load(Ordering::Relaxed),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of tracker counters for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSummary {
    pub requests_made: u64,
    pub requests_succeeded: u64,
    pub requests_rate_limited: u64,
    pub requests_failed: u64,
}
