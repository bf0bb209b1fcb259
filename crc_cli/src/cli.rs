//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(name = "crc15", version, about = "CRC-15 dose calibrator monitor")]
pub struct Cli {
    /// Path to config TOML (typed); a missing file uses built-in defaults
    #[arg(long, value_name = "FILE", default_value = "etc/crc15.toml")]
    pub config: PathBuf,

    /// Log and print as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the calibrator, fit the decay and export when the window is long enough
    Monitor {
        /// Operator name (event log and export file prefix)
        #[arg(long)]
        user: Option<String>,
        /// Batch identifier (event log and export file prefix)
        #[arg(long)]
        batch: Option<String>,
        /// Sampling interval in seconds (overrides sampling.interval_s)
        #[arg(long, value_name = "SECONDS")]
        interval: Option<f64>,
        /// Fit window length in minutes (overrides window.length_min)
        #[arg(long, value_name = "MINUTES")]
        window: Option<f64>,
        /// Stop after this many seconds
        #[arg(long, value_name = "SECONDS")]
        duration: Option<u64>,
        /// Do not touch the serial port; synthesize a test source
        #[arg(long, action = ArgAction::SetTrue)]
        emulate: bool,
        /// Do not write the per-day event log
        #[arg(long = "no-log", action = ArgAction::SetTrue)]
        no_log: bool,
    },
    /// Open the device (or emulation) and take a single reading
    SelfCheck {
        /// Use the emulated source instead of the serial port
        #[arg(long, action = ArgAction::SetTrue)]
        emulate: bool,
    },
    /// Fit a recorded event log offline
    Fit {
        /// Event log file (one JSON record per line)
        #[arg(long, value_name = "FILE")]
        log: PathBuf,
        /// Fit window length in minutes (defaults to window.length_min)
        #[arg(long, value_name = "MINUTES")]
        window: Option<f64>,
        /// Sampling interval the log was recorded at (defaults to sampling.interval_s)
        #[arg(long, value_name = "SECONDS")]
        interval: Option<f64>,
        /// Ignore samples before this UNIX timestamp
        #[arg(long, value_name = "TS")]
        from: Option<i64>,
    },
}
