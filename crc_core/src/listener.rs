//! Record listeners and their dispatch.
//!
//! Each listener runs on its own worker thread fed by a bounded channel.
//! The producer never blocks: a full queue drops the event with a warning.
//! A panicking listener only disconnects itself; the others keep receiving.
//!
//! Workers run between `start` and `close`. `close` drains every queue and
//! hands the listeners back so the next run can reuse them.
use crate::error::{MonitorError, ProtocolError};
use crate::export::ExportSignal;
use crate::types::SampleRecord;
use crc_traits::BoxError;
use crossbeam_channel as xch;
use std::thread::JoinHandle;

pub const DEFAULT_QUEUE: usize = 64;

pub trait Listener: Send {
    fn on_record(&mut self, record: &SampleRecord) -> Result<(), BoxError>;

    fn on_poll_error(&mut self, _error: &ProtocolError) {}

    /// Unsolicited bytes containing a newline arrived between polls.
    fn on_print_pressed(&mut self, _bytes: &[u8]) {}

    fn on_export(&mut self, _signal: &ExportSignal) {}
}

/// Adapter for a plain closure that only cares about records.
pub struct FnListener<F>(F);

pub fn listener_fn<F>(f: F) -> FnListener<F>
where
    F: FnMut(&SampleRecord) -> Result<(), BoxError> + Send,
{
    FnListener(f)
}

impl<F> Listener for FnListener<F>
where
    F: FnMut(&SampleRecord) -> Result<(), BoxError> + Send,
{
    fn on_record(&mut self, record: &SampleRecord) -> Result<(), BoxError> {
        (self.0)(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Record(SampleRecord),
    PollFailed(ProtocolError),
    PrintPressed(Vec<u8>),
    Export(ExportSignal),
}

type Named = (String, Box<dyn Listener>);

struct Worker {
    name: String,
    tx: Option<xch::Sender<MonitorEvent>>,
    handle: Option<JoinHandle<Box<dyn Listener>>>,
}

pub struct Dispatcher {
    idle: Vec<Named>,
    workers: Vec<Worker>,
    queue: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("idle", &self.idle.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field(
                "workers",
                &self.workers.iter().map(|w| &w.name).collect::<Vec<_>>(),
            )
            .field("queue", &self.queue)
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_queue(DEFAULT_QUEUE)
    }

    pub fn with_queue(queue: usize) -> Self {
        Self {
            idle: Vec::new(),
            workers: Vec::new(),
            queue: queue.max(1),
        }
    }

    /// Register a listener. While running it gets a worker immediately.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        listener: Box<dyn Listener>,
    ) -> Result<(), MonitorError> {
        let name = name.into();
        if self.is_running() {
            let worker = spawn_worker(name, listener, self.queue)?;
            self.workers.push(worker);
        } else {
            self.idle.push((name, listener));
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Registered listeners, idle or active.
    pub fn len(&self) -> usize {
        self.idle.len() + self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn one worker per idle listener.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        while let Some((name, listener)) = self.idle.pop() {
            let worker = spawn_worker(name, listener, self.queue)?;
            self.workers.push(worker);
        }
        Ok(())
    }

    /// Queue `event` for every live worker; returns how many accepted it.
    pub fn dispatch(&mut self, event: &MonitorEvent) -> usize {
        let mut delivered = 0;
        for w in &mut self.workers {
            let Some(tx) = &w.tx else { continue };
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(xch::TrySendError::Full(_)) => {
                    tracing::warn!(listener = %w.name, "listener queue full; event dropped");
                }
                Err(xch::TrySendError::Disconnected(_)) => {
                    tracing::warn!(listener = %w.name, "listener disconnected");
                    w.tx = None;
                }
            }
        }
        delivered
    }

    /// Drain every queue, join the workers and keep the surviving listeners.
    pub fn close(&mut self) {
        for w in &mut self.workers {
            w.tx = None;
        }
        for mut w in self.workers.drain(..) {
            let Some(handle) = w.handle.take() else {
                continue;
            };
            match handle.join() {
                Ok(listener) => self.idle.push((w.name, listener)),
                Err(e) => {
                    tracing::warn!(listener = %w.name, ?e, "listener panicked; dropped");
                }
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_worker(
    name: String,
    mut listener: Box<dyn Listener>,
    queue: usize,
) -> Result<Worker, MonitorError> {
    let (tx, rx) = xch::bounded::<MonitorEvent>(queue);
    let thread_name = format!("crc-listener-{name}");
    let log_name = name.clone();
    let handle = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            for event in rx {
                match &event {
                    MonitorEvent::Record(r) => {
                        if let Err(e) = listener.on_record(r) {
                            tracing::warn!(listener = %log_name, error = %e, "listener failed");
                        }
                    }
                    MonitorEvent::PollFailed(e) => listener.on_poll_error(e),
                    MonitorEvent::PrintPressed(b) => listener.on_print_pressed(b),
                    MonitorEvent::Export(s) => listener.on_export(s),
                }
            }
            listener
        })
        .map_err(|e| MonitorError::Spawn(e.to_string()))?;
    Ok(Worker {
        name,
        tx: Some(tx),
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isotope::Isotope;
    use crate::types::Unit;
    use std::sync::{Arc, Mutex};

    fn rec(ts: i64) -> SampleRecord {
        SampleRecord {
            isotope: Isotope::Test,
            unit: Unit::GBq,
            activity: 1.0,
            timestamp: ts,
        }
    }

    #[test]
    fn close_drains_queue_and_returns_listeners() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut d = Dispatcher::new();
        d.add(
            "collect",
            Box::new(listener_fn(move |r| {
                sink.lock().unwrap().push(r.timestamp);
                Ok(())
            })),
        )
        .unwrap();
        d.start().unwrap();
        for ts in 0..10 {
            assert_eq!(d.dispatch(&MonitorEvent::Record(rec(ts))), 1);
        }
        d.close();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert!(!d.is_running());
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn failing_listener_keeps_receiving() {
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let mut d = Dispatcher::new();
        d.add(
            "flaky",
            Box::new(listener_fn(move |_| {
                *c.lock().unwrap() += 1;
                Err("disk full".into())
            })),
        )
        .unwrap();
        d.start().unwrap();
        d.dispatch(&MonitorEvent::Record(rec(1)));
        d.dispatch(&MonitorEvent::Record(rec(2)));
        d.close();
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
