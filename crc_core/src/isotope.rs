//! Isotope reference table.
//!
//! The calibrator reports isotopes as 6-byte space-padded codes. Only codes
//! listed here are accepted; anything else is rejected at decode time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Isotope {
    F18,
    C11,
    N13,
    O15,
    Tc99m,
    Cs137,
    /// Synthetic isotope used by the emulator.
    Test,
}

const MIN_PER_HOUR: f64 = 60.0;
const MIN_PER_YEAR: f64 = 365.0 * 24.0 * 60.0;

/// (isotope, device code, half-life in minutes)
const REFERENCE: [(Isotope, &str, f64); 7] = [
    (Isotope::F18, "F 18", 109.7),
    (Isotope::C11, "C 11", 20.4),
    (Isotope::N13, "N 13", 9.96),
    (Isotope::O15, "O 15", 2.07),
    (Isotope::Tc99m, "Tc99m", 6.0058 * MIN_PER_HOUR),
    (Isotope::Cs137, "Cs137", 30.17 * MIN_PER_YEAR),
    (Isotope::Test, "TST", 5.0),
];

impl Isotope {
    pub const ALL: [Isotope; 7] = [
        Isotope::F18,
        Isotope::C11,
        Isotope::N13,
        Isotope::O15,
        Isotope::Tc99m,
        Isotope::Cs137,
        Isotope::Test,
    ];

    fn entry(self) -> (Isotope, &'static str, f64) {
        REFERENCE[self as usize]
    }

    /// Code as printed by the calibrator, without padding.
    pub fn code(self) -> &'static str {
        self.entry().1
    }

    pub fn half_life_min(self) -> f64 {
        self.entry().2
    }

    pub fn half_life_secs(self) -> f64 {
        self.half_life_min() * 60.0
    }

    /// Look up a device code; trailing whitespace and NUL padding are ignored.
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim_end_matches(|c: char| c.is_whitespace() || c == '\0');
        REFERENCE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(iso, _, _)| *iso)
    }
}

impl fmt::Display for Isotope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownIsotope(pub String);

impl fmt::Display for UnknownIsotope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown isotope code {:?}", self.0)
    }
}

impl std::error::Error for UnknownIsotope {}

impl FromStr for Isotope {
    type Err = UnknownIsotope;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| UnknownIsotope(s.to_string()))
    }
}

impl From<Isotope> for String {
    fn from(iso: Isotope) -> Self {
        iso.code().to_string()
    }
}

impl TryFrom<String> for Isotope {
    type Error = UnknownIsotope;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
