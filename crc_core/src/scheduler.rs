//! Periodic sampling.
//!
//! `SamplingLoop` is one wake's worth of work and can be driven directly
//! with a `ManualClock`. `Scheduler` owns the thread around it: start opens
//! the device (or falls back to emulation), stop joins the thread and hands
//! back the connector and listeners.
//!
//! Stop is observed at the next wake. Worst-case latency is one wake period
//! plus one in-flight poll (`timeout × retries`).
use crate::config::{BufferCfg, Settings, check_interval, check_tolerance, check_window};
use crate::error::{ConfigError, MonitorError, ProtocolError};
use crate::export::ExportTrigger;
use crate::fit::{FitEngine, FitReport};
use crate::listener::{Dispatcher, Listener, MonitorEvent};
use crate::protocol::{Emulator, ProtocolDriver};
use crate::session::{Session, SessionState};
use crate::status::{SchedulerState, Tick};
use crate::util::{lock, samples_in_window};
use crc_traits::{Clock, Connector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

type SharedConnector = Option<Box<dyn Connector + Send>>;

pub struct SamplingLoop<C: Clock> {
    clock: C,
    driver: ProtocolDriver,
    connector: SharedConnector,
    settings: Arc<Mutex<Settings>>,
    session: Arc<Mutex<Session>>,
    dispatcher: Dispatcher,
    /// Wall-clock seconds of the last poll slot.
    anchor: f64,
    consecutive_timeouts: u32,
    reopens: u32,
}

impl<C: Clock> SamplingLoop<C> {
    /// Anchors the poll cadence at the current wall time, rounded.
    pub fn new(
        clock: C,
        driver: ProtocolDriver,
        settings: Arc<Mutex<Settings>>,
        session: Arc<Mutex<Session>>,
        dispatcher: Dispatcher,
    ) -> Self {
        let anchor = clock.epoch_secs().round();
        Self {
            clock,
            driver,
            connector: None,
            settings,
            session,
            dispatcher,
            anchor,
            consecutive_timeouts: 0,
            reopens: 0,
        }
    }

    pub fn with_connector(mut self, connector: SharedConnector) -> Self {
        self.connector = connector;
        self
    }

    pub fn is_emulated(&self) -> bool {
        self.driver.is_emulated()
    }

    /// Number of times the link was replaced after repeated timeouts.
    pub fn reopens(&self) -> u32 {
        self.reopens
    }

    pub fn wake(&self) -> Duration {
        lock(&self.settings).wake
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn into_parts(self) -> (SharedConnector, Dispatcher) {
        (self.connector, self.dispatcher)
    }

    pub fn tick(&mut self) -> Tick {
        let settings = lock(&self.settings).clone();
        self.drain_unsolicited();

        let interval = settings.interval_secs();
        let elapsed = self.clock.epoch_secs() - self.anchor;
        if elapsed < interval {
            return Tick::Idle;
        }
        self.anchor += elapsed - elapsed % interval;

        match self.driver.read_sample(&self.clock) {
            Ok(record) => {
                self.consecutive_timeouts = 0;
                let accepted = lock(&self.session).accept(&record, &settings.export);
                match accepted {
                    Ok(accepted) => {
                        tracing::debug!(
                            isotope = %record.isotope,
                            unit = %record.unit,
                            activity = record.activity,
                            timestamp = record.timestamp,
                            reset = accepted.reset,
                            "sample"
                        );
                        self.dispatcher.dispatch(&MonitorEvent::Record(record));
                        if let Some(signal) = accepted.export {
                            tracing::info!(
                                span_secs = signal.span_secs,
                                threshold = signal.threshold,
                                "export threshold crossed; stopping"
                            );
                            self.dispatcher.dispatch(&MonitorEvent::Export(signal));
                            return Tick::ExportRequested(signal);
                        }
                        Tick::Sampled(record)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "sample rejected");
                        Tick::Rejected(e)
                    }
                }
            }
            Err(e) => {
                if matches!(e, ProtocolError::ReadTimeout { .. }) {
                    self.consecutive_timeouts += 1;
                    self.escalate(settings.reopen_after_timeouts);
                } else {
                    self.consecutive_timeouts = 0;
                }
                tracing::warn!(error = %e, consecutive = self.consecutive_timeouts, "poll skipped");
                self.dispatcher.dispatch(&MonitorEvent::PollFailed(e.clone()));
                Tick::Skipped(e)
            }
        }
    }

    fn escalate(&mut self, reopen_after: u32) {
        if reopen_after == 0 || self.consecutive_timeouts < reopen_after {
            return;
        }
        self.consecutive_timeouts = 0;
        let Some(connector) = self.connector.as_mut() else {
            return;
        };
        match connector.open() {
            Ok(link) => {
                self.driver.replace_link(link);
                self.reopens += 1;
                tracing::info!(reopens = self.reopens, "serial link re-opened");
            }
            Err(e) => {
                tracing::warn!(error = %e, "re-open failed; keeping current link");
            }
        }
    }

    fn drain_unsolicited(&mut self) {
        match self.driver.drain_unsolicited() {
            Ok(Some(bytes)) if bytes.contains(&b'\n') => {
                tracing::info!(bytes = bytes.len(), "print pressed");
                self.dispatcher.dispatch(&MonitorEvent::PrintPressed(bytes));
            }
            Ok(Some(bytes)) => tracing::trace!(?bytes, "unsolicited input"),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "drain failed"),
        }
    }
}

/// Owns the sampling thread, the shared settings and the session.
pub struct Scheduler<C: Clock + Clone + Send + 'static> {
    clock: C,
    settings: Arc<Mutex<Settings>>,
    session: Arc<Mutex<Session>>,
    /// Session buffer size, fixed at construction
    buffer: BufferCfg,
    connector: SharedConnector,
    dispatcher: Option<Dispatcher>,
    force_emulation: bool,
    emulator_seed: Option<u64>,
    emulated: Arc<AtomicBool>,
    /// Shutdown flag for the sampling thread
    shutdown: Arc<AtomicBool>,
    /// Cleared by the thread on exit, including the export self-stop
    running: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<(SharedConnector, Dispatcher)>>,
}

impl<C: Clock + Clone + Send + 'static> Scheduler<C> {
    pub fn new(settings: Settings, buffer: BufferCfg, clock: C) -> Result<Self, MonitorError> {
        settings.validate()?;
        let session = Session::new(buffer.capacity())?;
        Ok(Self {
            clock,
            settings: Arc::new(Mutex::new(settings)),
            session: Arc::new(Mutex::new(session)),
            buffer,
            connector: None,
            dispatcher: Some(Dispatcher::new()),
            force_emulation: false,
            emulator_seed: None,
            emulated: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            join_handle: None,
        })
    }

    pub fn with_connector(mut self, connector: impl Connector + Send + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Skip the device entirely.
    pub fn force_emulation(mut self) -> Self {
        self.force_emulation = true;
        self
    }

    pub fn with_emulator_seed(mut self, seed: u64) -> Self {
        self.emulator_seed = Some(seed);
        self
    }

    /// Listeners are registered while stopped and kept across runs.
    pub fn add_listener(
        &mut self,
        name: impl Into<String>,
        listener: impl Listener + 'static,
    ) -> Result<(), MonitorError> {
        self.reap();
        match self.dispatcher.as_mut() {
            Some(d) => d.add(name, Box::new(listener)),
            None => Err(MonitorError::AlreadyRunning),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub fn is_emulated(&self) -> bool {
        self.emulated.load(Ordering::Relaxed)
    }

    pub fn start(&mut self) -> Result<(), MonitorError> {
        self.reap();
        if self.join_handle.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let settings = lock(&self.settings).clone();
        settings.validate()?;

        let driver = self.open_driver(&settings);
        self.emulated.store(driver.is_emulated(), Ordering::Relaxed);
        lock(&self.session).begin_run();

        let mut dispatcher = self.dispatcher.take().unwrap_or_default();
        if let Err(e) = dispatcher.start() {
            dispatcher.close();
            self.dispatcher = Some(dispatcher);
            return Err(e);
        }

        let mut sampling = SamplingLoop::new(
            self.clock.clone(),
            driver,
            self.settings.clone(),
            self.session.clone(),
            dispatcher,
        )
        .with_connector(self.connector.take());

        self.shutdown.store(false, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);
        let shutdown = self.shutdown.clone();
        let running = self.running.clone();
        let clock = self.clock.clone();

        let spawned = std::thread::Builder::new()
            .name("crc-sampler".into())
            .spawn(move || {
                loop {
                    if shutdown.load(Ordering::Relaxed) {
                        tracing::debug!("sampler thread received shutdown signal");
                        break;
                    }
                    if sampling.tick().is_terminal() {
                        break;
                    }
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    clock.sleep(sampling.wake());
                }
                running.store(false, Ordering::Release);
                tracing::trace!("sampler thread exiting cleanly");
                sampling.into_parts()
            });

        match spawned {
            Ok(handle) => {
                self.join_handle = Some(handle);
                tracing::info!(
                    emulated = self.is_emulated(),
                    interval_s = settings.interval_secs(),
                    "sampling started"
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(MonitorError::Spawn(e.to_string()))
            }
        }
    }

    /// Request shutdown and join. Once this returns the device handle is
    /// released and every listener has seen its last event.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if self.join_handle.is_some() {
            self.join();
            tracing::info!("sampling stopped");
        }
    }

    /// Collect a thread that already exited (export self-stop).
    fn reap(&mut self) {
        if self
            .join_handle
            .as_ref()
            .is_some_and(std::thread::JoinHandle::is_finished)
        {
            self.join();
        }
    }

    fn join(&mut self) {
        let Some(handle) = self.join_handle.take() else {
            return;
        };
        match handle.join() {
            Ok((connector, mut dispatcher)) => {
                dispatcher.close();
                self.connector = connector;
                self.dispatcher = Some(dispatcher);
            }
            Err(e) => {
                tracing::warn!(?e, "sampler thread panicked during shutdown");
                self.dispatcher = Some(Dispatcher::new());
            }
        }
        self.running.store(false, Ordering::Release);
    }

    fn open_driver(&mut self, settings: &Settings) -> ProtocolDriver {
        let emulator = || match self.emulator_seed {
            Some(seed) => Emulator::seeded(seed),
            None => Emulator::new(),
        };
        if self.force_emulation {
            tracing::info!("emulation requested");
            return ProtocolDriver::emulated(emulator());
        }
        let Some(connector) = self.connector.as_mut() else {
            tracing::warn!("no device configured; falling back to emulation");
            return ProtocolDriver::emulated(emulator());
        };
        let link = match connector.open() {
            Ok(link) => link,
            Err(e) => {
                let e = MonitorError::DeviceOpenFailed(e.to_string());
                tracing::warn!(error = %e, "falling back to emulation");
                return ProtocolDriver::emulated(emulator());
            }
        };
        let mut driver = ProtocolDriver::device(link, settings.retries);
        match driver.read_sample(&self.clock) {
            Ok(record) => {
                tracing::info!(isotope = %record.isotope, unit = %record.unit, "device self-test ok");
                driver
            }
            Err(e) => {
                tracing::warn!(error = %e, "device self-test failed; falling back to emulation");
                ProtocolDriver::emulated(emulator())
            }
        }
    }

    pub fn settings(&self) -> Settings {
        lock(&self.settings).clone()
    }

    fn check_fits(&self, window_min: f64, interval_s: f64) -> Result<(), ConfigError> {
        let needed = samples_in_window(window_min, interval_s);
        let capacity = self.buffer.capacity();
        if needed > capacity {
            tracing::warn!(needed, capacity, window_min, interval_s, "window exceeds sample buffer");
            return Err(ConfigError::Invalid(
                "window does not fit the sample buffer at this interval",
            ));
        }
        Ok(())
    }

    /// Takes effect on the next wake.
    pub fn set_interval(&self, interval: Duration) -> Result<(), ConfigError> {
        check_interval(interval)?;
        let mut s = lock(&self.settings);
        if s.wake > interval {
            return Err(ConfigError::Invalid(
                "wake period must not exceed the sampling interval",
            ));
        }
        self.check_fits(s.window_min, interval.as_secs_f64())?;
        s.interval = interval;
        Ok(())
    }

    /// Rejected when the window at the current interval would outgrow the
    /// buffer sized at construction.
    pub fn set_window_minutes(&self, window_min: f64) -> Result<(), ConfigError> {
        check_window(window_min)?;
        let mut s = lock(&self.settings);
        self.check_fits(window_min, s.interval_secs())?;
        s.window_min = window_min;
        Ok(())
    }

    pub fn set_tolerance(&self, tolerance: f64) -> Result<(), ConfigError> {
        check_tolerance(tolerance)?;
        lock(&self.settings).tolerance = tolerance;
        Ok(())
    }

    pub fn set_export_threshold(&self, threshold: f64) -> Result<(), ConfigError> {
        let trigger = ExportTrigger::new(threshold)?;
        lock(&self.settings).export = trigger;
        Ok(())
    }

    /// Pin the fit start; `None` fits from the oldest windowed sample.
    pub fn select_fit_from(&self, timestamp: Option<i64>) {
        lock(&self.session).set_fit_from(timestamp);
    }

    pub fn session_state(&self) -> SessionState {
        *lock(&self.session).state()
    }

    /// Fit the current window with the current settings.
    pub fn report(&self) -> Option<FitReport> {
        let s = self.settings();
        let engine = FitEngine::new(s.max_iterations);
        lock(&self.session).report(s.window_min, s.interval_secs(), s.tolerance, &engine)
    }
}

impl<C: Clock + Clone + Send + 'static> Drop for Scheduler<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
