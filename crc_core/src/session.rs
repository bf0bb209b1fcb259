//! Per-run acquisition state: current isotope/unit, the rolling window and
//! the user's fit-from selection.

use crate::error::{ConfigError, WindowError};
use crate::export::{ExportSignal, ExportTrigger};
use crate::fit::{FitEngine, FitReport};
use crate::isotope::Isotope;
use crate::types::{SampleRecord, Unit};
use crate::util::samples_in_window;
use crate::window::RollingWindow;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionState {
    pub isotope: Option<Isotope>,
    pub unit: Option<Unit>,
    /// Reference half-life of `isotope`, minutes.
    pub half_life_min: Option<f64>,
    pub fit_from: Option<i64>,
    pub needs_reset: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            isotope: None,
            unit: None,
            half_life_min: None,
            fit_from: None,
            needs_reset: true,
        }
    }
}

/// Result of feeding one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accepted {
    /// The window was cleared before this record went in.
    pub reset: bool,
    pub export: Option<ExportSignal>,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    window: RollingWindow,
}

impl Session {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            state: SessionState::default(),
            window: RollingWindow::with_capacity(capacity)?,
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    /// Start of a run: the next record starts a fresh window.
    pub fn begin_run(&mut self) {
        self.state.needs_reset = true;
    }

    /// Resize the buffer; drops all samples.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), ConfigError> {
        self.window.reset(capacity)?;
        self.state.fit_from = None;
        Ok(())
    }

    /// Append `record`, resetting first on an isotope or unit change, then
    /// run the export check. A rejected record changes nothing.
    pub fn accept(
        &mut self,
        record: &SampleRecord,
        trigger: &ExportTrigger,
    ) -> Result<Accepted, WindowError> {
        if !record.activity.is_finite() {
            return Err(WindowError::NonFinite(record.activity));
        }
        let identity_changed =
            self.state.isotope != Some(record.isotope) || self.state.unit != Some(record.unit);
        let reset = self.state.needs_reset || identity_changed;

        if reset {
            tracing::info!(
                isotope = %record.isotope,
                unit = %record.unit,
                previous = ?self.state.isotope,
                "window reset"
            );
            self.window.clear();
            self.state = SessionState {
                isotope: Some(record.isotope),
                unit: Some(record.unit),
                half_life_min: Some(record.isotope.half_life_min()),
                fit_from: None,
                needs_reset: false,
            };
        }
        self.window.append(record.activity, record.timestamp)?;

        let span_secs = self.window.span_secs();
        let export = trigger
            .crossed(record.isotope.half_life_secs(), span_secs)
            .then(|| ExportSignal {
                isotope: record.isotope,
                half_life_min: record.isotope.half_life_min(),
                threshold: trigger.threshold(),
                span_secs,
                newest_timestamp: record.timestamp,
            });
        Ok(Accepted { reset, export })
    }

    /// Pin the fit start. The fit never starts before the oldest windowed
    /// sample regardless of what is set here.
    pub fn set_fit_from(&mut self, timestamp: Option<i64>) {
        self.state.fit_from = timestamp;
    }

    /// Fit the most recent `window_min` of data. `None` before the first
    /// record of a run.
    pub fn report(
        &self,
        window_min: f64,
        interval_s: f64,
        tolerance: f64,
        engine: &FitEngine,
    ) -> Option<FitReport> {
        let isotope = self.state.isotope?;
        let unit = self.state.unit?;
        let reference = self.state.half_life_min?;
        let samples = self.window.window(samples_in_window(window_min, interval_s));
        let outcome = engine.evaluate(&samples, self.state.fit_from, reference);
        Some(FitReport {
            isotope,
            unit,
            reference_half_life: reference,
            tolerance,
            samples,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::FitOutcome;

    fn rec(isotope: Isotope, unit: Unit, activity: f64, timestamp: i64) -> SampleRecord {
        SampleRecord {
            isotope,
            unit,
            activity,
            timestamp,
        }
    }

    #[test]
    fn first_record_resets() {
        let mut s = Session::new(16).unwrap();
        let a = s
            .accept(&rec(Isotope::F18, Unit::GBq, 1.0, 10), &ExportTrigger::disabled())
            .unwrap();
        assert!(a.reset);
        assert_eq!(s.state().half_life_min, Some(109.7));
        let b = s
            .accept(&rec(Isotope::F18, Unit::GBq, 0.9, 20), &ExportTrigger::disabled())
            .unwrap();
        assert!(!b.reset);
        assert_eq!(s.window().len(), 2);
    }

    #[test]
    fn unit_change_clears_window_and_fit_from() {
        let mut s = Session::new(16).unwrap();
        let off = ExportTrigger::disabled();
        s.accept(&rec(Isotope::F18, Unit::GBq, 1.0, 10), &off).unwrap();
        s.accept(&rec(Isotope::F18, Unit::GBq, 1.0, 20), &off).unwrap();
        s.set_fit_from(Some(15));
        let a = s.accept(&rec(Isotope::F18, Unit::MBq, 900.0, 30), &off).unwrap();
        assert!(a.reset);
        assert_eq!(s.window().len(), 1);
        assert_eq!(s.state().fit_from, None);
    }

    #[test]
    fn rejected_record_keeps_state() {
        let mut s = Session::new(16).unwrap();
        let off = ExportTrigger::disabled();
        s.accept(&rec(Isotope::C11, Unit::MBq, 5.0, 100), &off).unwrap();
        assert!(s
            .accept(&rec(Isotope::F18, Unit::MBq, f64::INFINITY, 200), &off)
            .is_err());
        assert_eq!(s.state().isotope, Some(Isotope::C11));
        assert!(s.accept(&rec(Isotope::C11, Unit::MBq, 5.0, 50), &off).is_err());
        assert_eq!(s.window().len(), 1);
    }

    #[test]
    fn begin_run_forces_reset() {
        let mut s = Session::new(16).unwrap();
        let off = ExportTrigger::disabled();
        s.accept(&rec(Isotope::C11, Unit::MBq, 5.0, 100), &off).unwrap();
        s.begin_run();
        // an older timestamp is fine once the window has been cleared
        let a = s.accept(&rec(Isotope::C11, Unit::MBq, 5.0, 50), &off).unwrap();
        assert!(a.reset);
    }

    #[test]
    fn report_before_first_record_is_none() {
        let s = Session::new(4).unwrap();
        assert!(s.report(30.0, 10.0, 0.05, &FitEngine::default()).is_none());
    }

    #[test]
    fn report_with_few_samples_is_raw() {
        let mut s = Session::new(16).unwrap();
        s.accept(&rec(Isotope::C11, Unit::MBq, 5.0, 100), &ExportTrigger::disabled())
            .unwrap();
        let r = s.report(30.0, 10.0, 0.05, &FitEngine::default()).unwrap();
        assert_eq!(r.outcome, FitOutcome::RawOnly);
        assert!(!r.passes());
    }
}
