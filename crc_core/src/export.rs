//! Unattended-export trigger.
//!
//! Fires once the in-window span exceeds `threshold` half-lives. The
//! scheduler stops right after the signal, so each crossing fires once.

use crate::error::ConfigError;
use crate::isotope::Isotope;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportTrigger {
    threshold: f64,
}

/// Emitted on the crossing; consumed by the export collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportSignal {
    pub isotope: Isotope,
    pub half_life_min: f64,
    pub threshold: f64,
    pub span_secs: i64,
    pub newest_timestamp: i64,
}

impl Default for ExportTrigger {
    fn default() -> Self {
        Self { threshold: 0.25 }
    }
}

impl ExportTrigger {
    /// `threshold` is a multiple of the half-life; 0 disables.
    pub fn new(threshold: f64) -> Result<Self, ConfigError> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Invalid("export threshold must be >= 0"));
        }
        Ok(Self { threshold })
    }

    pub const fn disabled() -> Self {
        Self { threshold: 0.0 }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold > 0.0
    }

    /// `threshold * half_life < span`, strictly.
    pub fn crossed(&self, half_life_secs: f64, span_secs: i64) -> bool {
        self.is_enabled() && self.threshold * half_life_secs < span_secs as f64
    }
}
