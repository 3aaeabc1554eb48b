//! Small helpers shared across the core.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::ControlError;

/// Seconds in the scheduler's retention window (24 h).
pub const SECS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

/// Lock a mutex, recovering the data if a panicking tick poisoned it.
#[inline]
pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Convert seconds to a `Duration`, rejecting negative, non-finite and
/// unrepresentably large values.
#[inline]
pub fn secs_to_duration(s: f64) -> Result<Duration, ControlError> {
    Duration::try_from_secs_f64(s)
        .map_err(|e| ControlError::validation(format!("duration {s} s not representable: {e}")))
}

/// Clamp without panicking on inverted bounds or NaN input (NaN maps to `lo`).
#[inline]
pub fn clamp_f64(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        return lo;
    }
    v.max(lo).min(hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secs_to_duration_rejects_bad_input() {
        assert!(secs_to_duration(-1.0).is_err());
        assert!(secs_to_duration(f64::NAN).is_err());
        assert!(secs_to_duration(1e20).is_err());
        assert_eq!(secs_to_duration(1.5), Ok(Duration::from_millis(1500)));
    }

    #[test]
    fn clamp_handles_nan_and_infinities() {
        assert_eq!(clamp_f64(f64::NAN, 60.0, 150.0), 60.0);
        assert_eq!(clamp_f64(f64::INFINITY, 60.0, 150.0), 150.0);
        assert_eq!(clamp_f64(f64::NEG_INFINITY, 60.0, 150.0), 60.0);
        assert_eq!(clamp_f64(90.0, 60.0, 150.0), 90.0);
    }
}
