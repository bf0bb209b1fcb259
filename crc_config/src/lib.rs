#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the CRC-15 logger.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Every section is optional; defaults match the calibrator's factory
//!   link settings and the logger's stock sampling steps.
use serde::Deserialize;
use serde::de::Deserializer;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PortCfg {
    /// Serial device name (e.g. "/dev/ttyUSB0", "COM1")
    pub name: String,
    pub baud: u32,
    /// Byte timeout per read (ms). Also accepts alias "byte_timeout_ms".
    #[serde(alias = "byte_timeout_ms")]
    pub timeout_ms: u64,
    /// Command/response attempts per poll before giving up
    pub retries: u32,
}

impl Default for PortCfg {
    fn default() -> Self {
        Self {
            name: "/dev/ttyS0".to_string(),
            baud: 4800,
            timeout_ms: 100,
            retries: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingCfg {
    /// Seconds between polls
    pub interval_s: f64,
    /// Selectable intervals; the smallest one sizes the sample buffer
    pub intervals_s: Vec<f64>,
    /// Scheduler wake cadence (ms); must be finer than the interval
    pub wake_ms: u64,
    /// Re-open the port after this many consecutive read timeouts (0 disables)
    pub reopen_after_timeouts: u32,
}

impl Default for SamplingCfg {
    fn default() -> Self {
        Self {
            interval_s: 10.0,
            intervals_s: vec![2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0],
            wake_ms: 100,
            reopen_after_timeouts: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    /// Trailing window shown and fitted (minutes)
    pub length_min: f64,
    /// Selectable window lengths; the largest one sizes the sample buffer
    pub lengths_min: Vec<f64>,
    /// Extra buffer slots beyond the computed capacity
    pub slack: usize,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            length_min: 30.0,
            lengths_min: vec![5.0, 10.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1440.0],
            slack: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FitCfg {
    /// Relative half-life tolerance for the pass/fail check
    pub tolerance: f64,
    /// Levenberg-Marquardt iteration cap
    pub max_iterations: u32,
}

impl Default for FitCfg {
    fn default() -> Self {
        Self {
            tolerance: 0.05,
            max_iterations: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportCfg {
    /// Stop and export after this many half-lives of data in the window.
    /// Accepts a number or one of "Off", "1/16", "1/8", "1/4", "1/2", "1", "2", ...
    #[serde(deserialize_with = "de_threshold")]
    pub threshold: f64,
    /// Directory for export reports
    pub dir: String,
}

impl Default for ExportCfg {
    fn default() -> Self {
        Self {
            threshold: 0.25,
            dir: "exports".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SessionCfg {
    pub user: String,
    pub batch: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
    /// Directory for the per-day sample event log; None disables it
    pub event_log_dir: Option<String>,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            file: None,
            level: None,
            rotation: None,
            event_log_dir: Some("logs".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub port: PortCfg,
    pub sampling: SamplingCfg,
    pub window: WindowCfg,
    pub fit: FitCfg,
    pub export: ExportCfg,
    pub session: SessionCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read and parse a config file. A missing file yields the defaults.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    load_toml(&text).map_err(|e| eyre::eyre!("invalid configuration {:?}: {}", path, e))
}

/// Parse an export threshold in half-lives.
///
/// "Off" (any case) and "0" disable the trigger; "a/b" fractions and plain
/// decimals are accepted.
pub fn parse_threshold(s: &str) -> Result<f64, String> {
    let t = s.trim();
    if t.eq_ignore_ascii_case("off") {
        return Ok(0.0);
    }
    let value = if let Some((num, den)) = t.split_once('/') {
        let num: f64 = num
            .trim()
            .parse()
            .map_err(|_| format!("bad threshold numerator in {t:?}"))?;
        let den: f64 = den
            .trim()
            .parse()
            .map_err(|_| format!("bad threshold denominator in {t:?}"))?;
        if den == 0.0 {
            return Err(format!("threshold {t:?} divides by zero"));
        }
        num / den
    } else {
        t.parse::<f64>()
            .map_err(|_| format!("threshold {t:?} is not a number, fraction or \"Off\""))?
    };
    if !value.is_finite() || value < 0.0 {
        return Err(format!("threshold {t:?} must be >= 0"));
    }
    Ok(value)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThresholdToml {
    Number(f64),
    Text(String),
}

fn de_threshold<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match ThresholdToml::deserialize(deserializer)? {
        ThresholdToml::Number(v) => Ok(v),
        ThresholdToml::Text(s) => parse_threshold(&s).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Smallest selectable sampling interval, including the active one.
    pub fn min_interval_s(&self) -> f64 {
        self.sampling
            .intervals_s
            .iter()
            .copied()
            .fold(self.sampling.interval_s, f64::min)
    }

    /// Largest selectable window length, including the active one.
    pub fn max_window_min(&self) -> f64 {
        self.window
            .lengths_min
            .iter()
            .copied()
            .fold(self.window.length_min, f64::max)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Port
        if self.port.name.trim().is_empty() {
            eyre::bail!("port.name must not be empty");
        }
        if self.port.baud == 0 {
            eyre::bail!("port.baud must be > 0");
        }
        if self.port.timeout_ms == 0 {
            eyre::bail!("port.timeout_ms must be >= 1");
        }
        if self.port.retries == 0 {
            eyre::bail!("port.retries must be >= 1");
        }
        if self.port.retries > 100 {
            eyre::bail!("port.retries is unreasonably large (>100)");
        }

        // Sampling
        if !(self.sampling.interval_s.is_finite() && self.sampling.interval_s > 0.0) {
            eyre::bail!("sampling.interval_s must be > 0");
        }
        if self
            .sampling
            .intervals_s
            .iter()
            .any(|v| !(v.is_finite() && *v > 0.0))
        {
            eyre::bail!("sampling.intervals_s entries must be > 0");
        }
        if self.sampling.wake_ms == 0 {
            eyre::bail!("sampling.wake_ms must be >= 1");
        }
        if (self.sampling.wake_ms as f64) > self.min_interval_s() * 1000.0 {
            eyre::bail!("sampling.wake_ms must not exceed the smallest sampling interval");
        }

        // Window
        if !(self.window.length_min.is_finite() && self.window.length_min > 0.0) {
            eyre::bail!("window.length_min must be > 0");
        }
        if self
            .window
            .lengths_min
            .iter()
            .any(|v| !(v.is_finite() && *v > 0.0))
        {
            eyre::bail!("window.lengths_min entries must be > 0");
        }
        if self.max_window_min() * 60.0 / self.min_interval_s() > 10_000_000.0 {
            eyre::bail!("window buffer is unreasonably large (>10M samples)");
        }

        // Fit
        if !(self.fit.tolerance > 0.0 && self.fit.tolerance < 1.0) {
            eyre::bail!("fit.tolerance must be in (0.0, 1.0)");
        }
        if self.fit.max_iterations == 0 {
            eyre::bail!("fit.max_iterations must be >= 1");
        }

        // Export
        if !(self.export.threshold.is_finite() && self.export.threshold >= 0.0) {
            eyre::bail!("export.threshold must be >= 0 (0 disables)");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
