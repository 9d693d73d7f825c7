//! Progress and speed computation for running transfers.

use std::time::{Duration, Instant};

/// Minimum interval between progress samples. Sampling less often bounds the
/// volume of progress notifications pushed at observers.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Instantaneous speed in bytes per second over a sampling window.
///
/// A zero or negative window yields 0.0 rather than dividing.
pub fn speed(bytes_now: u64, bytes_before: u64, now: Instant, before: Instant) -> f64 {
    let dt = now.saturating_duration_since(before).as_secs_f64();
    if dt <= 0.0 {
        return 0.0;
    }
    bytes_now.saturating_sub(bytes_before) as f64 / dt
}

/// Progress percentage, clamped to [0, 100].
pub fn percent(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (bytes as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Sampling state held by a worker across one attempt.
///
/// `sample` returns the measured speed once at least [`MIN_SAMPLE_INTERVAL`]
/// has elapsed since the previous accepted sample, and `None` otherwise.
#[derive(Debug)]
pub struct ProgressSampler {
    last_bytes: u64,
    last_at: Instant,
}

impl ProgressSampler {
    pub fn new(bytes: u64, now: Instant) -> Self {
        Self {
            last_bytes: bytes,
            last_at: now,
        }
    }

    /// Restart the window, e.g. after a pause, so idle time is not counted
    /// into the next speed figure.
    pub fn reset(&mut self, bytes: u64, now: Instant) {
        self.last_bytes = bytes;
        self.last_at = now;
    }

    pub fn sample(&mut self, bytes_now: u64, now: Instant) -> Option<f64> {
        if now.saturating_duration_since(self.last_at) < MIN_SAMPLE_INTERVAL {
            return None;
        }
        let measured = speed(bytes_now, self.last_bytes, now, self.last_at);
        self.last_bytes = bytes_now;
        self.last_at = now;
        Some(measured)
    }
}
