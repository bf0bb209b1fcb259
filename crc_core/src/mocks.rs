//! Test and helper mocks for crc_core

use crate::error::ProtocolError;
use crate::export::ExportSignal;
use crate::listener::Listener;
use crate::types::SampleRecord;
use crc_traits::{BoxError, Connector, SerialLink};
use std::sync::{Arc, Mutex};

/// A link that never answers; every poll ends in `ReadTimeout`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLink;

impl SerialLink for NoopLink {
    fn clear_input(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
    fn write_all(&mut self, _bytes: &[u8]) -> Result<(), BoxError> {
        Ok(())
    }
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, BoxError> {
        Ok(0)
    }
    fn bytes_waiting(&mut self) -> Result<usize, BoxError> {
        Ok(0)
    }
}

/// A connector whose port never opens.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingConnector;

impl Connector for FailingConnector {
    fn open(&mut self) -> Result<Box<dyn SerialLink + Send>, BoxError> {
        Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such device",
        )))
    }
}

/// Everything a listener saw, shared with the test body.
#[derive(Debug, Default)]
pub struct Collected {
    pub records: Vec<SampleRecord>,
    pub poll_errors: Vec<ProtocolError>,
    pub prints: Vec<Vec<u8>>,
    pub exports: Vec<ExportSignal>,
}

#[derive(Debug, Default, Clone)]
pub struct CollectingListener {
    inner: Arc<Mutex<Collected>>,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&Collected) -> R) -> R {
        f(&crate::util::lock(&self.inner))
    }

    pub fn records(&self) -> Vec<SampleRecord> {
        self.with(|c| c.records.clone())
    }
}

impl Listener for CollectingListener {
    fn on_record(&mut self, record: &SampleRecord) -> Result<(), BoxError> {
        crate::util::lock(&self.inner).records.push(*record);
        Ok(())
    }

    fn on_poll_error(&mut self, error: &ProtocolError) {
        crate::util::lock(&self.inner).poll_errors.push(error.clone());
    }

    fn on_print_pressed(&mut self, bytes: &[u8]) {
        crate::util::lock(&self.inner).prints.push(bytes.to_vec());
    }

    fn on_export(&mut self, signal: &ExportSignal) {
        crate::util::lock(&self.inner).exports.push(*signal);
    }
}
