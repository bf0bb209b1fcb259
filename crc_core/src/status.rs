//! Scheduler lifecycle state and per-wake outcome.

use crate::error::{ProtocolError, WindowError};
use crate::export::ExportSignal;
use crate::types::SampleRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// What one wake of the sampling loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Not yet time to poll.
    Idle,
    /// A record was accepted and dispatched.
    Sampled(SampleRecord),
    /// The poll failed; sampling continues.
    Skipped(ProtocolError),
    /// The record was read but not accepted into the window.
    Rejected(WindowError),
    /// Export threshold crossed; the loop stops after this.
    ExportRequested(ExportSignal),
}

impl Tick {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Tick::ExportRequested(_))
    }
}
