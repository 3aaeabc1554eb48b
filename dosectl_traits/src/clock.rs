use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock abstraction for dose timing across the stack.
///
/// - now(): seconds on this clock's timeline (Unix seconds for `SystemClock`)
/// - since(): helper to compute elapsed seconds from an earlier timestamp
pub trait Clock {
    fn now(&self) -> f64;

    /// Seconds elapsed since `earlier`, saturating at 0 when the clock steps back.
    fn since(&self, earlier: f64) -> f64 {
        (self.now() - earlier).max(0.0)
    }
}

/// Default, real-time clock reporting Unix seconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// Clones share the same timeline, so a test can keep one handle and give
/// another to the controller.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_s: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at an absolute timestamp.
    pub fn starting_at(t: f64) -> Self {
        Self {
            now_s: Arc::new(Mutex::new(t)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut now) = self.now_s.lock() {
            *now += d.as_secs_f64();
        }
    }

    /// Jump to an absolute timestamp (may move backwards).
    pub fn set(&self, t: f64) {
        if let Ok(mut now) = self.now_s.lock() {
            *now = t;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now_s.lock().map(|g| *g).unwrap_or(0.0)
    }
}
