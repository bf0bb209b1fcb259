use crate::isotope::Isotope;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Activity unit as reported by the calibrator's unit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "?")]
    Unknown,
    #[serde(rename = "uCi")]
    MicroCi,
    #[serde(rename = "mCi")]
    MilliCi,
    #[serde(rename = "Ci")]
    Ci,
    #[serde(rename = "MBq")]
    MBq,
    #[serde(rename = "GBq")]
    GBq,
}

impl Unit {
    /// Ordered by unit index, six entries, so index 6 is out of range.
    ///
    /// The CRC-15 firmware table carries a second `?` at index 1, which
    /// shifts every real unit up by one: a physical device sending `0x05`
    /// means MBq, while this table reads it as GBq.
    pub const TABLE: [Unit; 6] = [
        Unit::Unknown,
        Unit::MicroCi,
        Unit::MilliCi,
        Unit::Ci,
        Unit::MBq,
        Unit::GBq,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::TABLE.get(usize::from(index)).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Unknown => "?",
            Unit::MicroCi => "uCi",
            Unit::MilliCi => "mCi",
            Unit::Ci => "Ci",
            Unit::MBq => "MBq",
            Unit::GBq => "GBq",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One accepted calibrator reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub isotope: Isotope,
    pub unit: Unit,
    pub activity: f64,
    /// Seconds since the UNIX epoch.
    pub timestamp: i64,
}

impl SampleRecord {
    /// Event-log form: one JSON object, no trailing newline.
    pub fn to_log_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_log_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

/// A (timestamp, activity) point from the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: i64,
    pub activity: f64,
}
