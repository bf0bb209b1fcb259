//! CRC-15 command/response protocol.
//!
//! One poll = clear stale input, send `COMMAND`, read exactly `DATA_SIZE`
//! bytes. The response layout is little-endian:
//!
//! | bytes | field                                   |
//! |-------|-----------------------------------------|
//! | 0..6  | isotope code, ASCII, space padded       |
//! | 6     | unit index into `Unit::TABLE`           |
//! | 7..11 | activity, IEEE-754 `f32`                |
//!
//! Without a device the driver runs an `Emulator` that produces a noisy
//! decay of the synthetic `TST` isotope.

use crate::decay;
use crate::error::ProtocolError;
use crate::hw_error::{LinkFault, map_link_error};
use crate::isotope::Isotope;
use crate::types::{SampleRecord, Unit};
use crate::util::ceil_timestamp;
use crc_traits::{Clock, SerialLink};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

pub const COMMAND: &[u8] = b"@ABCDEFGHIJK\r\n";
pub const DATA_SIZE: usize = 11;
pub const DEFAULT_RETRIES: u32 = 5;

const ISOTOPE_LEN: usize = 6;
const EMULATED_INITIAL_ACTIVITY: f64 = 2.0;
const EMULATED_REL_SIGMA: f64 = 0.025;

/// Decoded and validated response frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub isotope: Isotope,
    pub unit: Unit,
    pub activity: f32,
}

pub fn decode_frame(bytes: &[u8; DATA_SIZE]) -> Result<Frame, ProtocolError> {
    let (code, rest) = bytes.split_at(ISOTOPE_LEN);
    let unit_index = rest[0];
    let activity = f32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]);
    let code = String::from_utf8_lossy(code);
    let code = code.trim_end_matches(|c: char| c.is_whitespace() || c == '\0');

    match (Unit::from_index(unit_index), Isotope::from_code(code)) {
        (Some(unit), Some(isotope)) => Ok(Frame {
            isotope,
            unit,
            activity,
        }),
        _ => Err(ProtocolError::InvalidSample {
            unit: unit_index,
            isotope: code.to_string(),
        }),
    }
}

/// Build a response frame; used by simulators and tests.
pub fn encode_frame(code: &str, unit_index: u8, activity: f32) -> [u8; DATA_SIZE] {
    let mut out = [b' '; DATA_SIZE];
    for (slot, b) in out[..ISOTOPE_LEN].iter_mut().zip(code.bytes()) {
        *slot = b;
    }
    out[ISOTOPE_LEN] = unit_index;
    out[ISOTOPE_LEN + 1..].copy_from_slice(&activity.to_le_bytes());
    out
}

/// Synthetic calibrator: `TST` decaying from 2 GBq with 2.5 % Gaussian jitter.
///
/// The decay clock is anchored at the first emulated sample.
#[derive(Debug)]
pub struct Emulator {
    anchor: Option<i64>,
    half_life_secs: f64,
    rng: StdRng,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic noise for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            anchor: None,
            half_life_secs: Isotope::Test.half_life_secs(),
            rng,
        }
    }

    pub fn anchor(&self) -> Option<i64> {
        self.anchor
    }

    pub fn sample(&mut self, timestamp: i64) -> SampleRecord {
        let anchor = *self.anchor.get_or_insert(timestamp);
        let elapsed = (timestamp - anchor) as f64;
        let clean = decay::eval(elapsed, EMULATED_INITIAL_ACTIVITY, self.half_life_secs);
        let z: f64 = self.rng.sample(StandardNormal);
        SampleRecord {
            isotope: Isotope::Test,
            unit: Unit::GBq,
            activity: clean * (1.0 + EMULATED_REL_SIGMA * z),
            timestamp,
        }
    }
}

pub enum Backend {
    Device(Box<dyn SerialLink + Send>),
    Emulated(Emulator),
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Device(_) => f.write_str("Device"),
            Backend::Emulated(e) => f.debug_tuple("Emulated").field(e).finish(),
        }
    }
}

#[derive(Debug)]
pub struct ProtocolDriver {
    backend: Backend,
    retries: u32,
}

impl ProtocolDriver {
    pub fn device(link: Box<dyn SerialLink + Send>, retries: u32) -> Self {
        Self {
            backend: Backend::Device(link),
            retries: retries.max(1),
        }
    }

    pub fn emulated(emulator: Emulator) -> Self {
        Self {
            backend: Backend::Emulated(emulator),
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn is_emulated(&self) -> bool {
        matches!(self.backend, Backend::Emulated(_))
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Swap in a freshly opened link; the old handle is dropped.
    /// No effect on an emulated driver.
    pub fn replace_link(&mut self, link: Box<dyn SerialLink + Send>) {
        if let Backend::Device(old) = &mut self.backend {
            *old = link;
        }
    }

    /// Poll once. The timestamp is taken when the read completes.
    pub fn read_sample<C: Clock + ?Sized>(
        &mut self,
        clock: &C,
    ) -> Result<SampleRecord, ProtocolError> {
        let link = match &mut self.backend {
            Backend::Emulated(emu) => return Ok(emu.sample(ceil_timestamp(clock.epoch_secs()))),
            Backend::Device(link) => link,
        };

        let mut buf = [0u8; DATA_SIZE];
        for attempt in 1..=self.retries {
            match exchange(link.as_mut(), &mut buf) {
                Ok(n) if n == DATA_SIZE => {
                    let timestamp = ceil_timestamp(clock.epoch_secs());
                    tracing::trace!(frame = ?buf, "crc15 frame");
                    let frame = decode_frame(&buf)?;
                    return Ok(SampleRecord {
                        isotope: frame.isotope,
                        unit: frame.unit,
                        activity: f64::from(frame.activity),
                        timestamp,
                    });
                }
                Ok(n) => {
                    tracing::debug!(attempt, got = n, want = DATA_SIZE, "short read");
                }
                Err(LinkFault::Quiet) => {
                    tracing::debug!(attempt, "link timeout");
                }
                Err(LinkFault::Fault(e)) => return Err(e),
            }
        }
        Err(ProtocolError::ReadTimeout {
            attempts: self.retries,
        })
    }

    /// Take whatever arrived between polls (e.g. front-panel print output).
    pub fn drain_unsolicited(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Backend::Device(link) = &mut self.backend else {
            return Ok(None);
        };
        let waiting = match link.bytes_waiting() {
            Ok(n) => n,
            Err(e) => return fault_or_none(&*e),
        };
        if waiting == 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; waiting];
        let n = match link.read(&mut buf) {
            Ok(n) => n,
            Err(e) => return fault_or_none(&*e),
        };
        buf.truncate(n);
        Ok(if buf.is_empty() { None } else { Some(buf) })
    }
}

fn fault_or_none(e: &(dyn std::error::Error + 'static)) -> Result<Option<Vec<u8>>, ProtocolError> {
    match map_link_error(e) {
        LinkFault::Quiet => Ok(None),
        LinkFault::Fault(f) => Err(f),
    }
}

fn exchange(link: &mut (dyn SerialLink + Send), buf: &mut [u8]) -> Result<usize, LinkFault> {
    link.clear_input().map_err(|e| map_link_error(&*e))?;
    link.write_all(COMMAND).map_err(|e| map_link_error(&*e))?;
    link.read(buf).map_err(|e| map_link_error(&*e))
}
