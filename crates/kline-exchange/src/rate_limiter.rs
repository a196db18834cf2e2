//! Multi-window rate limiting for exchange REST calls.
//!
//! Two sliding windows (1 s and 60 s) plus an optional minimum spacing
//! between consecutive calls. Each `acquire` reserves its call slot under
//! the lock and then sleeps outside it, so concurrent callers queue up in
//! order without oversubscribing either window.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum calls in any 1 second window. Default: 10.
    #[serde(default = "default_max_calls_per_second")]
    pub max_calls_per_second: u32,
    /// Maximum calls in any 60 second window. Default: 600.
    #[serde(default = "default_max_calls_per_minute")]
    pub max_calls_per_minute: u32,
    /// Space consecutive calls at least `1 / max_calls_per_second` apart.
    /// Default: true.
    #[serde(default = "default_burst_protection")]
    pub burst_protection: bool,
}

fn default_max_calls_per_second() -> u32 {
    10
}

fn default_max_calls_per_minute() -> u32 {
    600
}

fn default_burst_protection() -> bool {
    true
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_calls_per_second: default_max_calls_per_second(),
            max_calls_per_minute: default_max_calls_per_minute(),
            burst_protection: default_burst_protection(),
        }
    }
}

/// Snapshot of limiter counters.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub total_calls: u64,
    pub total_wait_seconds: f64,
    pub calls_last_second: usize,
    pub calls_last_minute: usize,
    pub max_calls_per_second: u32,
    pub max_calls_per_minute: u32,
    pub burst_protection: bool,
    /// `calls / (calls + seconds waited)` as a percentage.
    pub efficiency_percent: f64,
}

struct WindowState {
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
    last_call: Option<Instant>,
    total_calls: u64,
    total_wait: Duration,
}

impl WindowState {
    fn prune(&mut self, now: Instant) {
        prune_window(&mut self.second, now, SECOND);
        prune_window(&mut self.minute, now, MINUTE);
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    let Some(cutoff) = now.checked_sub(span) else {
        return;
    };
    while window.front().is_some_and(|&t| t <= cutoff) {
        window.pop_front();
    }
}

/// Earliest instant a new call may be placed so that `window` holds fewer
/// than `max` calls in the `span` ending at that instant.
fn window_release(window: &VecDeque<Instant>, max: usize, span: Duration) -> Option<Instant> {
    if max == 0 || window.len() < max {
        return None;
    }
    window.get(window.len() - max).map(|&t| t + span)
}

/// Sliding-window rate limiter with burst smoothing.
pub struct RateLimiter {
    config: RateLimiterConfig,
    min_interval: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let min_interval = if config.burst_protection && config.max_calls_per_second > 0 {
            SECOND / config.max_calls_per_second
        } else {
            Duration::ZERO
        };

        debug!(
            per_second = config.max_calls_per_second,
            per_minute = config.max_calls_per_minute,
            burst_protection = config.burst_protection,
            "Rate limiter initialized"
        );

        Self {
            state: Mutex::new(WindowState {
                second: VecDeque::with_capacity(config.max_calls_per_second as usize),
                minute: VecDeque::with_capacity(config.max_calls_per_minute as usize),
                last_call: None,
                total_calls: 0,
                total_wait: Duration::ZERO,
            }),
            min_interval,
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait until one more call is allowed, then record it.
    ///
    /// The wait is the maximum of the burst spacing, the per-second window
    /// and the per-minute window; the caller sleeps once. Returns the time
    /// spent waiting.
    pub async fn acquire(&self) -> Duration {
        let (slot, wait) = self.reserve(Instant::now());

        if !wait.is_zero() {
            if wait >= SECOND {
                warn!(wait_ms = wait.as_millis() as u64, "Rate limit window full, waiting");
            } else {
                debug!(wait_ms = wait.as_millis() as u64, "Rate limiting");
            }
            tokio::time::sleep_until(slot).await;
        }

        wait
    }

    /// Reserve the next call slot at or after `now`.
    fn reserve(&self, now: Instant) -> (Instant, Duration) {
        let mut state = self.state.lock();
        state.prune(now);

        let mut slot = now;
        if let Some(last) = state.last_call {
            slot = slot.max(last + self.min_interval);
        }
        if let Some(t) = window_release(
            &state.second,
            self.config.max_calls_per_second as usize,
            SECOND,
        ) {
            slot = slot.max(t);
        }
        if let Some(t) = window_release(
            &state.minute,
            self.config.max_calls_per_minute as usize,
            MINUTE,
        ) {
            slot = slot.max(t);
        }

        state.second.push_back(slot);
        state.minute.push_back(slot);
        state.last_call = Some(slot);
        state.total_calls += 1;

        let wait = slot.saturating_duration_since(now);
        state.total_wait += wait;
        (slot, wait)
    }

    pub fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock();
        state.prune(Instant::now());

        let total_wait_seconds = state.total_wait.as_secs_f64();
        let calls = state.total_calls as f64;
        let efficiency_percent = (calls / (calls + total_wait_seconds).max(1.0)) * 100.0;

        RateLimiterStats {
            total_calls: state.total_calls,
            total_wait_seconds,
            calls_last_second: state.second.len(),
            calls_last_minute: state.minute.len(),
            max_calls_per_second: self.config.max_calls_per_second,
            max_calls_per_minute: self.config.max_calls_per_minute,
            burst_protection: self.config.burst_protection,
            efficiency_percent: (efficiency_percent * 10.0).round() / 10.0,
        }
    }

    /// Reset counters. Window contents are kept.
    pub fn reset_stats(&self) {
        let mut state = self.state.lock();
        state.total_calls = 0;
        state.total_wait = Duration::ZERO;
    }
}
