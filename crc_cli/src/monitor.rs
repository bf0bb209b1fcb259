//! `monitor` and `self-check` commands.

use crate::cli::json_mode;
use crate::event_log::EventLog;
use crate::report::write_export;
use crc_core::{
    Emulator, ExportSignal, FitReport, Listener, MonitorError, MonitorEvent, ProtocolDriver,
    ProtocolError, SampleRecord, Scheduler, SchedulerState,
};
use crc_hardware::{PortSettings, SerialConnector};
use crc_traits::{BoxError, Connector, SystemClock};
use crossbeam_channel as xch;
use eyre::Result;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL_UI: Duration = Duration::from_millis(100);

pub fn port_settings(cfg: &crc_config::PortCfg) -> PortSettings {
    PortSettings {
        name: cfg.name.clone(),
        baud: cfg.baud,
        timeout: Duration::from_millis(cfg.timeout_ms),
    }
}

#[derive(Debug, Default, Clone)]
pub struct MonitorOpts {
    pub user: Option<String>,
    pub batch: Option<String>,
    pub interval: Option<f64>,
    pub window: Option<f64>,
    pub duration: Option<u64>,
    pub emulate: bool,
    pub no_log: bool,
}

/// Forwards scheduler events to the main thread for printing.
struct ChannelListener {
    tx: xch::Sender<MonitorEvent>,
}

impl Listener for ChannelListener {
    fn on_record(&mut self, record: &SampleRecord) -> Result<(), BoxError> {
        self.tx.send(MonitorEvent::Record(*record))?;
        Ok(())
    }

    fn on_poll_error(&mut self, error: &ProtocolError) {
        let _ = self.tx.send(MonitorEvent::PollFailed(error.clone()));
    }

    fn on_print_pressed(&mut self, bytes: &[u8]) {
        let _ = self.tx.send(MonitorEvent::PrintPressed(bytes.to_vec()));
    }

    fn on_export(&mut self, signal: &ExportSignal) {
        let _ = self.tx.send(MonitorEvent::Export(*signal));
    }
}

fn identity(value: Option<String>, configured: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| (!configured.trim().is_empty()).then(|| configured.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn print_record(rec: &SampleRecord) {
    if json_mode() {
        println!(
            "{}",
            serde_json::json!({ "event": "record", "record": rec })
        );
    } else {
        println!(
            "{} {} {:.4} {}",
            rec.timestamp, rec.isotope, rec.activity, rec.unit
        );
    }
}

fn fit_summary(report: &FitReport) -> String {
    match report.fit() {
        Some(r) => format!(
            "  T\u{bd} = {:.3} \u{b1} {:.3} min (ref {:.3}, {}), R = {:.6}, n = {}",
            r.half_life,
            r.half_life_uncertainty,
            report.reference_half_life,
            if report.passes() { "PASS" } else { "FAIL" },
            r.r_squared,
            r.sample_count
        ),
        None => format!("  {report}"),
    }
}

fn print_report(report: &FitReport, full: bool) {
    if json_mode() {
        println!(
            "{}",
            serde_json::json!({ "event": "fit", "outcome": report.outcome, "passes": report.passes() })
        );
    } else if full {
        println!("{report}");
    } else {
        println!("{}", fit_summary(report));
    }
}

fn handle_event(scheduler: &Scheduler<SystemClock>, event: MonitorEvent) -> Option<ExportSignal> {
    match event {
        MonitorEvent::Record(rec) => {
            print_record(&rec);
            if let Some(report) = scheduler.report() {
                print_report(&report, false);
            }
        }
        MonitorEvent::PollFailed(e) => {
            tracing::warn!(error = %e, "poll skipped");
        }
        MonitorEvent::PrintPressed(_) => {
            if let Some(report) = scheduler.report() {
                print_report(&report, true);
            }
        }
        MonitorEvent::Export(signal) => return Some(signal),
    }
    None
}

pub fn run_monitor(
    mut cfg: crc_config::Config,
    opts: MonitorOpts,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    if let Some(s) = opts.interval {
        cfg.sampling.interval_s = s;
    }
    if let Some(m) = opts.window {
        cfg.window.length_min = m;
    }
    let (settings, buffer) = crc_core::settings_from_config(&cfg)?;
    let user = identity(opts.user, &cfg.session.user);
    let batch = identity(opts.batch, &cfg.session.batch);

    let mut scheduler = Scheduler::new(settings, buffer, SystemClock)?;
    scheduler = if opts.emulate {
        scheduler.force_emulation()
    } else {
        scheduler.with_connector(SerialConnector::new(port_settings(&cfg.port)))
    };

    let (tx, rx) = xch::unbounded();
    scheduler.add_listener("console", ChannelListener { tx })?;
    if !opts.no_log
        && let Some(dir) = cfg.logging.event_log_dir.as_deref()
    {
        scheduler.add_listener("event-log", EventLog::open(Path::new(dir), &batch, &user)?)?;
    }

    scheduler.start()?;
    tracing::info!(
        user = %user,
        batch = %batch,
        emulated = scheduler.is_emulated(),
        interval_s = cfg.sampling.interval_s,
        window_min = cfg.window.length_min,
        "monitoring"
    );

    let deadline = opts
        .duration
        .map(|s| Instant::now() + Duration::from_secs(s));
    let mut exported: Option<ExportSignal> = None;
    while exported.is_none() {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("interrupted");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("duration elapsed");
            break;
        }
        match rx.recv_timeout(POLL_UI) {
            Ok(event) => exported = handle_event(&scheduler, event),
            Err(xch::RecvTimeoutError::Timeout) => {
                if scheduler.state() == SchedulerState::Stopped {
                    break;
                }
            }
            Err(xch::RecvTimeoutError::Disconnected) => break,
        }
    }
    // stop() drains the listener queues; pick up whatever they forwarded
    scheduler.stop();
    for event in rx.try_iter() {
        if let Some(signal) = handle_event(&scheduler, event) {
            exported.get_or_insert(signal);
        }
    }

    if let Some(signal) = exported {
        tracing::info!(
            isotope = %signal.isotope,
            span_secs = signal.span_secs,
            threshold = signal.threshold,
            "export threshold reached"
        );
        if let Some(report) = scheduler.report() {
            let path = write_export(
                Path::new(&cfg.export.dir),
                &batch,
                &user,
                &signal,
                &report,
                chrono::Local::now(),
            )?;
            print_report(&report, true);
            if json_mode() {
                println!(
                    "{}",
                    serde_json::json!({ "event": "export", "path": path.display().to_string() })
                );
            } else {
                println!("exported {}", path.display());
            }
        }
    }
    Ok(())
}

pub fn self_check(cfg: &crc_config::Config, emulate: bool) -> Result<()> {
    cfg.validate()
        .map_err(|e| e.wrap_err("invalid configuration"))?;
    let mut driver = if emulate {
        ProtocolDriver::emulated(Emulator::new())
    } else {
        let mut connector = SerialConnector::new(port_settings(&cfg.port));
        let link = connector
            .open()
            .map_err(|e| MonitorError::DeviceOpenFailed(format!("{}: {e}", cfg.port.name)))?;
        ProtocolDriver::device(link, cfg.port.retries)
    };
    let rec = driver.read_sample(&SystemClock)?;
    if json_mode() {
        println!(
            "{}",
            serde_json::json!({ "ok": true, "emulated": driver.is_emulated(), "record": rec })
        );
    } else {
        println!(
            "ok: {} {:.4} {} at {}{}",
            rec.isotope,
            rec.activity,
            rec.unit,
            rec.timestamp,
            if driver.is_emulated() { " (emulated)" } else { "" }
        );
    }
    Ok(())
}
