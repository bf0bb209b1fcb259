use std::io::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("open serial port {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("serial timeout")]
    Timeout,
    #[error("serial support not compiled in (enable the `hardware` feature)")]
    Unsupported,
    #[error("io: {0}")]
    Io(std::io::Error),
}

/// `TimedOut` becomes [`HwError::Timeout`] so callers can tell a quiet
/// device from a broken link.
impl From<std::io::Error> for HwError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
