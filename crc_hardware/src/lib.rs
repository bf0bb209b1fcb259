#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Serial link implementations for the CRC-15 calibrator.
//!
//! - `SerialConnector` opens the real port (feature `hardware`, via `serialport`).
//! - `ScriptedLink` replays canned responses for simulation and tests.
pub mod error;
pub mod util;

use crc_traits::{BoxError, Connector, SerialLink};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use error::HwError;

/// Port settings for the calibrator link.
#[derive(Debug, Clone)]
pub struct PortSettings {
    pub name: String,
    pub baud: u32,
    pub timeout: Duration,
}

/// Opens `serialport` links with fixed settings.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    settings: PortSettings,
}

impl SerialConnector {
    pub fn new(settings: PortSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }
}

impl Connector for SerialConnector {
    fn open(&mut self) -> Result<Box<dyn SerialLink + Send>, BoxError> {
        #[cfg(feature = "hardware")]
        {
            let link = hardware::SerialPortLink::open(&self.settings)?;
            tracing::info!(
                port = %self.settings.name,
                baud = self.settings.baud,
                "serial port opened"
            );
            Ok(Box::new(link))
        }
        #[cfg(not(feature = "hardware"))]
        {
            tracing::debug!(port = %self.settings.name, "serial support disabled");
            Err(Box::new(HwError::Unsupported))
        }
    }
}

#[cfg(feature = "hardware")]
pub mod hardware {
    use super::PortSettings;
    use crate::error::{HwError, Result};
    use crate::util::read_full_with_timeout;
    use crc_traits::{BoxError, SerialLink};
    use serialport::{ClearBuffer, SerialPort};
    use std::io::{Read, Write};
    use std::time::Duration;

    pub struct SerialPortLink {
        port: Box<dyn SerialPort>,
        timeout: Duration,
    }

    impl SerialPortLink {
        pub fn open(settings: &PortSettings) -> Result<Self> {
            let port = serialport::new(&settings.name, settings.baud)
                .timeout(settings.timeout)
                .open()
                .map_err(|e| HwError::Open {
                    port: settings.name.clone(),
                    reason: e.to_string(),
                })?;
            Ok(Self {
                port,
                timeout: settings.timeout,
            })
        }
    }

    impl SerialLink for SerialPortLink {
        fn clear_input(&mut self) -> std::result::Result<(), BoxError> {
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }

        fn write_all(&mut self, bytes: &[u8]) -> std::result::Result<(), BoxError> {
            self.port.write_all(bytes).map_err(HwError::from)?;
            self.port.flush().map_err(HwError::from)?;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, BoxError> {
            let port = &mut self.port;
            let n = read_full_with_timeout(|b| port.read(b), buf, self.timeout)?;
            tracing::trace!(bytes = n, wanted = buf.len(), "serial read");
            Ok(n)
        }

        fn bytes_waiting(&mut self) -> std::result::Result<usize, BoxError> {
            Ok(self.port.bytes_to_read()? as usize)
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<Vec<u8>>,
    repeat: Option<Vec<u8>>,
    input: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    clears: usize,
}

/// Simulated calibrator link.
///
/// Every write queues the next scripted response (or the repeat response)
/// into the input buffer; `inject` adds unsolicited bytes such as the
/// front-panel print button. Clones share state so tests can inspect traffic.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLink {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command with `frame`.
    pub fn repeating(frame: impl Into<Vec<u8>>) -> Self {
        let link = Self::new();
        link.with(|s| s.repeat = Some(frame.into()));
        link
    }

    /// Queue a one-shot response; consumed before the repeat response.
    pub fn push_response(&self, frame: impl Into<Vec<u8>>) {
        self.with(|s| s.responses.push_back(frame.into()));
    }

    pub fn inject(&self, bytes: &[u8]) {
        self.with(|s| s.input.extend(bytes.iter().copied()));
    }

    pub fn writes(&self) -> usize {
        self.with(|s| s.writes.len())
    }

    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.with(|s| s.writes.last().cloned())
    }

    pub fn clears(&self) -> usize {
        self.with(|s| s.clears)
    }

    fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl SerialLink for ScriptedLink {
    fn clear_input(&mut self) -> Result<(), BoxError> {
        self.with(|s| {
            s.input.clear();
            s.clears += 1;
        });
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        self.with(|s| {
            s.writes.push(bytes.to_vec());
            let next = s.responses.pop_front().or_else(|| s.repeat.clone());
            if let Some(frame) = next {
                s.input.extend(frame);
            }
        });
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BoxError> {
        Ok(self.with(|s| {
            let n = buf.len().min(s.input.len());
            for (slot, byte) in buf.iter_mut().zip(s.input.drain(..n)) {
                *slot = byte;
            }
            n
        }))
    }

    fn bytes_waiting(&mut self) -> Result<usize, BoxError> {
        Ok(self.with(|s| s.input.len()))
    }
}

/// Hands out clones of one `ScriptedLink`; counts how often it was asked.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    link: ScriptedLink,
    opens: Arc<Mutex<usize>>,
}

impl ScriptedConnector {
    pub fn new(link: ScriptedLink) -> Self {
        Self {
            link,
            opens: Arc::new(Mutex::new(0)),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.lock().map(|g| *g).unwrap_or(0)
    }
}

impl Connector for ScriptedConnector {
    fn open(&mut self) -> Result<Box<dyn SerialLink + Send>, BoxError> {
        if let Ok(mut n) = self.opens.lock() {
            *n += 1;
        }
        Ok(Box::new(self.link.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_link_answers_each_command() {
        let mut link = ScriptedLink::repeating(vec![1u8, 2, 3]);
        link.push_response(vec![9u8]);
        link.write_all(b"cmd").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(link.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 9);
        link.write_all(b"cmd").unwrap();
        assert_eq!(link.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(link.writes(), 2);
    }

    #[test]
    fn clear_drops_unsolicited_bytes() {
        let mut link = ScriptedLink::new();
        link.inject(b"print\r\n");
        assert_eq!(link.bytes_waiting().unwrap(), 7);
        link.clear_input().unwrap();
        assert_eq!(link.bytes_waiting().unwrap(), 0);
        assert_eq!(link.clears(), 1);
    }

    #[cfg(not(feature = "hardware"))]
    #[test]
    fn serial_connector_without_feature_is_unsupported() {
        let mut c = SerialConnector::new(PortSettings {
            name: "/dev/ttyS0".into(),
            baud: 4800,
            timeout: Duration::from_millis(100),
        });
        let err = c.open().err().expect("open must fail");
        assert!(err.to_string().contains("hardware"));
    }
}
