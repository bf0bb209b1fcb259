//! Common time and locking helpers for crc_core.

use std::sync::{Mutex, MutexGuard};

/// Number of seconds in one minute.
pub const SECS_PER_MIN: f64 = 60.0;

/// Record timestamp for a wall-clock reading: whole seconds, rounded up.
#[inline]
pub fn ceil_timestamp(epoch_secs: f64) -> i64 {
    epoch_secs.ceil() as i64
}

/// Number of samples a `window_min` window holds at `interval_s` spacing,
/// counting both endpoints.
#[inline]
pub fn samples_in_window(window_min: f64, interval_s: f64) -> usize {
    debug_assert!(interval_s > 0.0, "interval_s must be > 0");
    if !(window_min > 0.0 && interval_s > 0.0) {
        return 1;
    }
    (window_min * SECS_PER_MIN / interval_s).ceil() as usize + 1
}

// Poison is ignored: every guarded update completes before it can panic.

#[inline]
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
