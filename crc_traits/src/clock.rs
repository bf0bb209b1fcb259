use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Clock abstraction for sampling cadence and record timestamps.
///
/// - now(): returns a monotonic Instant used for wake pacing
/// - epoch_secs(): wall-clock seconds since the UNIX epoch (fractional)
/// - sleep(): sleeps for the provided duration (implementations may simulate)
pub trait Clock {
    fn now(&self) -> Instant;
    fn epoch_secs(&self) -> f64;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        dur.as_millis() as u64
    }
}

/// Default clock backed by `Instant` and `SystemTime`.
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
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn epoch_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when advanced.
///
/// now() = origin + offset, epoch_secs() = wall_origin + offset.
/// sleep(d) advances internal time by d without actually sleeping.
/// Clones share the same offset, so a clone handed to a sampling loop
/// can be driven from the test body.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: f64,
    offset: std::sync::Arc<std::sync::Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(1_700_000_000.0)
    }

    /// Start the wall clock at `unix_secs`.
    pub fn starting_at(unix_secs: f64) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: unix_secs,
            offset: std::sync::Arc::new(std::sync::Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    /// Set the absolute offset relative to origin.
    pub fn set_offset(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = d;
        }
    }

    fn offset(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn epoch_secs(&self) -> f64 {
        self.wall_origin + self.offset().as_secs_f64()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}
