#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! CRC-15 acquisition and decay-fit pipeline (hardware-agnostic).
//!
//! All device I/O goes through `crc_traits::SerialLink` and
//! `crc_traits::Connector`; time comes from `crc_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Decay model**: `A(t) = A0 * 0.5^(t / T½)` (`decay` module)
//! - **Protocol**: command/response polling, frame decode, emulation (`protocol`)
//! - **Window**: bounded ring of (timestamp, activity) samples (`window`)
//! - **Fit**: Levenberg–Marquardt decay fit with log-space R² (`fit`)
//! - **Export**: half-life-multiple stop trigger (`export`)
//! - **Scheduler**: sampling thread, listener dispatch, timeout escalation
//!   (`scheduler`, `listener`)
//!
//! ## Data flow
//!
//! `Scheduler` → `ProtocolDriver::read_sample` → `Session::accept`
//! (window append + export check) → listeners. Fits are computed on demand
//! with `Scheduler::report`.

pub mod config;
pub mod conversions;
pub mod decay;
pub mod error;
pub mod export;
pub mod fit;
pub mod hw_error;
pub mod isotope;
pub mod listener;
pub mod mocks;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod types;
pub mod util;
pub mod window;

pub use config::{BufferCfg, Settings};
pub use decay::DecayModel;
pub use error::{ConfigError, FitError, MonitorError, ProtocolError, Result, WindowError};
pub use export::{ExportSignal, ExportTrigger};
pub use fit::{FitEngine, FitOutcome, FitReport, FitResult};
pub use isotope::Isotope;
pub use listener::{Dispatcher, Listener, MonitorEvent, listener_fn};
pub use protocol::{Emulator, ProtocolDriver};
pub use scheduler::{SamplingLoop, Scheduler};
pub use session::{Session, SessionState};
pub use status::{SchedulerState, Tick};
pub use types::{Sample, SampleRecord, Unit};
pub use window::RollingWindow;

use eyre::WrapErr;

/// Validated runtime settings and buffer sizing from a loaded config file.
pub fn settings_from_config(cfg: &crc_config::Config) -> Result<(Settings, BufferCfg)> {
    cfg.validate().wrap_err("invalid configuration")?;
    let settings = Settings::from(cfg);
    settings
        .validate()
        .map_err(eyre::Report::new)
        .wrap_err("invalid runtime settings")?;
    let buffer = BufferCfg::from(cfg);
    if buffer.capacity() == 0 {
        return Err(eyre::Report::new(ConfigError::ZeroCapacity));
    }
    Ok((settings, buffer))
}
