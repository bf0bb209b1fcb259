//! `fit` command: replay an event log through a session and fit it.

use crate::cli::json_mode;
use crate::event_log::read_log;
use crc_core::{ExportTrigger, FitEngine, FitReport, Session, Settings};
use eyre::{Result, WrapErr};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
pub struct FitOpts {
    pub window: Option<f64>,
    pub interval: Option<f64>,
    pub from: Option<i64>,
}

pub fn fit_log(cfg: &crc_config::Config, log: &Path, opts: FitOpts) -> Result<FitReport> {
    cfg.validate().wrap_err("invalid configuration")?;
    let mut settings = Settings::from(cfg);
    if let Some(w) = opts.window {
        settings.window_min = w;
    }
    if let Some(s) = opts.interval {
        settings.interval = Duration::try_from_secs_f64(s)
            .map_err(|_| eyre::eyre!("invalid configuration: interval {s} s is not a duration"))?;
        settings.wake = settings.wake.min(settings.interval);
    }
    settings
        .validate()
        .map_err(eyre::Report::new)
        .wrap_err("invalid configuration")?;

    let records = read_log(log)?;
    if records.is_empty() {
        eyre::bail!("no records in {}", log.display());
    }

    let mut session = Session::new(records.len())?;
    let off = ExportTrigger::disabled();
    for rec in &records {
        match session.accept(rec, &off) {
            Ok(a) if a.reset => {
                tracing::info!(timestamp = rec.timestamp, "source changed; earlier records dropped");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(timestamp = rec.timestamp, error = %e, "record skipped"),
        }
    }
    session.set_fit_from(opts.from);

    let engine = FitEngine::new(settings.max_iterations);
    session
        .report(
            settings.window_min,
            settings.interval_secs(),
            settings.tolerance,
            &engine,
        )
        .ok_or_else(|| eyre::eyre!("no records to fit in {}", log.display()))
}

pub fn run_fit(cfg: &crc_config::Config, log: &Path, opts: FitOpts) -> Result<()> {
    let report = fit_log(cfg, log, opts)?;
    if json_mode() {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
