//! Runtime settings for the sampling scheduler.
//!
//! Separate from the TOML-deserialized config in `crc_config`; see
//! `conversions` for the mapping.

use crate::error::ConfigError;
use crate::export::ExportTrigger;
use crate::fit::{DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};
use crate::protocol::DEFAULT_RETRIES;
use crate::window::capacity_for;
use std::time::Duration;

/// Live-adjustable acquisition and fit settings, read once per wake.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Time between polls.
    pub interval: Duration,
    /// Scheduler wake period; much finer than `interval`.
    pub wake: Duration,
    /// Fit window length in minutes.
    pub window_min: f64,
    /// Relative half-life tolerance, (0, 1).
    pub tolerance: f64,
    pub export: ExportTrigger,
    /// Poll attempts before `ReadTimeout`.
    pub retries: u32,
    /// Consecutive timeouts before the link is reopened. 0 disables.
    pub reopen_after_timeouts: u32,
    pub max_iterations: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            wake: Duration::from_millis(100),
            window_min: 30.0,
            tolerance: DEFAULT_TOLERANCE,
            export: ExportTrigger::default(),
            retries: DEFAULT_RETRIES,
            reopen_after_timeouts: 10,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl Settings {
    pub fn interval_secs(&self) -> f64 {
        self.interval.as_secs_f64()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_interval(self.interval)?;
        if self.wake.is_zero() {
            return Err(ConfigError::Invalid("wake period must be > 0"));
        }
        if self.wake > self.interval {
            return Err(ConfigError::Invalid(
                "wake period must not exceed the sampling interval",
            ));
        }
        check_window(self.window_min)?;
        check_tolerance(self.tolerance)?;
        if self.retries == 0 {
            return Err(ConfigError::Invalid("retries must be >= 1"));
        }
        Ok(())
    }
}

pub(crate) fn check_interval(interval: Duration) -> Result<(), ConfigError> {
    if interval.is_zero() {
        Err(ConfigError::Invalid("sampling interval must be > 0"))
    } else {
        Ok(())
    }
}

pub(crate) fn check_window(window_min: f64) -> Result<(), ConfigError> {
    if window_min.is_finite() && window_min > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid("window length must be > 0"))
    }
}

pub(crate) fn check_tolerance(tolerance: f64) -> Result<(), ConfigError> {
    if tolerance > 0.0 && tolerance < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid("tolerance must be in (0, 1)"))
    }
}

/// Rolling-buffer sizing: enough room for the longest selectable window at
/// the shortest selectable interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferCfg {
    pub max_window_min: f64,
    pub min_interval_s: f64,
    pub slack: usize,
}

impl Default for BufferCfg {
    fn default() -> Self {
        Self {
            max_window_min: 1440.0,
            min_interval_s: 2.0,
            slack: 1,
        }
    }
}

impl BufferCfg {
    /// Sized for exactly the given settings.
    pub fn for_settings(settings: &Settings) -> Self {
        Self {
            max_window_min: settings.window_min,
            min_interval_s: settings.interval_secs(),
            slack: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        capacity_for(self.max_window_min, self.min_interval_s, self.slack)
    }
}
