//! `From` implementations bridging `crc_config` types to `crc_core` types.
//!
//! Values are mapped as-is; run `Settings::validate` afterwards.

use crate::config::{BufferCfg, Settings};
use crate::export::ExportTrigger;
use std::time::Duration;

fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO)
}

// ── Settings ─────────────────────────────────────────────────────────────────

impl From<&crc_config::Config> for Settings {
    fn from(c: &crc_config::Config) -> Self {
        Self {
            interval: secs(c.sampling.interval_s),
            wake: Duration::from_millis(c.sampling.wake_ms),
            window_min: c.window.length_min,
            tolerance: c.fit.tolerance,
            export: ExportTrigger::from(&c.export),
            retries: c.port.retries,
            reopen_after_timeouts: c.sampling.reopen_after_timeouts,
            max_iterations: c.fit.max_iterations,
        }
    }
}

// ── ExportTrigger ────────────────────────────────────────────────────────────

impl From<&crc_config::ExportCfg> for ExportTrigger {
    fn from(c: &crc_config::ExportCfg) -> Self {
        Self::new(c.threshold).unwrap_or_else(|_| Self::disabled())
    }
}

// ── BufferCfg ────────────────────────────────────────────────────────────────

impl From<&crc_config::Config> for BufferCfg {
    fn from(c: &crc_config::Config) -> Self {
        Self {
            max_window_min: c.max_window_min(),
            min_interval_s: c.min_interval_s(),
            slack: c.window.slack,
        }
    }
}
