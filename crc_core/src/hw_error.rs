//! Maps `Box<dyn Error>` from the `SerialLink` boundary to typed outcomes.
//!
//! The traits in `crc_traits` use `Box<dyn Error + Send + Sync>`; this module
//! decides whether a link error is just a quiet device (counts as a short
//! read) or a real fault, with an optional feature-gated path for
//! `crc_hardware::HwError` downcasting.

use crate::error::ProtocolError;

/// Outcome of a failed link call.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkFault {
    /// Device did not answer in time; the attempt is retried.
    Quiet,
    /// Anything else; the poll is abandoned.
    Fault(ProtocolError),
}

/// Classify a trait-boundary error.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_link_error(e: &(dyn std::error::Error + 'static)) -> LinkFault {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<crc_hardware::HwError>() {
            return match hw {
                crc_hardware::HwError::Timeout => LinkFault::Quiet,
                other => LinkFault::Fault(ProtocolError::Link(other.to_string())),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>()
        && matches!(
            io.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        )
    {
        return LinkFault::Quiet;
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timed out") || s.to_lowercase().contains("timeout") {
        LinkFault::Quiet
    } else {
        LinkFault::Fault(ProtocolError::Link(s))
    }
}
