use thiserror::Error;

/// Per-poll failures. Recoverable: the poll is skipped and sampling continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("no complete response after {attempts} attempts")]
    ReadTimeout { attempts: u32 },
    #[error("invalid sample: unit [{unit}], isotope [{isotope}]")]
    InvalidSample { unit: u8, isotope: String },
    #[error("serial link error: {0}")]
    Link(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("fit did not converge after {iterations} iterations")]
    NotConverged { iterations: u32 },
    #[error("fit covariance is singular")]
    SingularCovariance,
    #[error("fit produced non-finite values")]
    NonFinite,
    #[error("activity {0} is not positive; log-space fit is undefined")]
    NonPositiveActivity(f64),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("half-life must be positive and finite, got {0}")]
    HalfLife(f64),
    #[error("window capacity must be >= 1")]
    ZeroCapacity,
    #[error("invalid setting: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WindowError {
    #[error("sample at {timestamp} is older than newest sample at {newest}")]
    OutOfOrder { timestamp: i64, newest: i64 },
    #[error("activity {0} is not finite")]
    NonFinite(f64),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("scheduler already running")]
    AlreadyRunning,
    #[error("device open failed: {0}")]
    DeviceOpenFailed(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
