//! Human-readable error descriptions and structured JSON error formatting.

use crc_core::{ConfigError, FitError, MonitorError, ProtocolError};
use crc_hardware::HwError;

/// Stable process exit codes.
pub const EXIT_GENERIC: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_DEVICE: i32 = 3;

fn is_config_error(err: &eyre::Report) -> bool {
    err.downcast_ref::<ConfigError>().is_some()
        || matches!(err.downcast_ref::<MonitorError>(), Some(MonitorError::Config(_)))
        || err
            .chain()
            .any(|e| e.to_string().to_ascii_lowercase().contains("invalid configuration"))
}

fn is_device_error(err: &eyre::Report) -> bool {
    err.downcast_ref::<HwError>().is_some()
        || err.downcast_ref::<ProtocolError>().is_some()
        || matches!(
            err.downcast_ref::<MonitorError>(),
            Some(MonitorError::DeviceOpenFailed(_))
        )
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(me) = err.downcast_ref::<MonitorError>() {
        return match me {
            MonitorError::AlreadyRunning => {
                "What happened: The sampler is already running.\nLikely causes: start was requested twice.\nHow to fix: Stop the running session before starting a new one.".to_string()
            }
            MonitorError::DeviceOpenFailed(msg) => format!(
                "What happened: The calibrator serial port could not be opened ({msg}).\nLikely causes: Wrong port.name, cable unplugged, or missing permission on the device node.\nHow to fix: Check [port] in the config and the cable, or pass --emulate to run without the device."
            ),
            MonitorError::Config(ce) => format!(
                "What happened: Invalid configuration ({ce}).\nLikely causes: Out-of-range values in the TOML or on the command line.\nHow to fix: Edit the config file, then rerun."
            ),
            MonitorError::Spawn(msg) => format!(
                "What happened: A worker thread could not be started ({msg}).\nLikely causes: The system is out of threads or memory.\nHow to fix: Free resources and rerun."
            ),
        };
    }

    if let Some(pe) = err.downcast_ref::<ProtocolError>() {
        return match pe {
            ProtocolError::ReadTimeout { attempts } => format!(
                "What happened: The calibrator did not answer after {attempts} attempts.\nLikely causes: Device switched off, wrong baud rate, or the wrong port.\nHow to fix: Check the cable and port.baud, or raise port.timeout_ms / port.retries."
            ),
            ProtocolError::InvalidSample { unit, isotope } => format!(
                "What happened: The calibrator sent a reading that could not be decoded (unit [{unit}], isotope [{isotope}]).\nLikely causes: The calibrator is set to an isotope or unit this tool does not know.\nHow to fix: Select a supported isotope on the calibrator and retry."
            ),
            ProtocolError::Link(msg) => format!(
                "What happened: Serial link error ({msg}).\nLikely causes: Device unplugged during a read.\nHow to fix: Reconnect the device and rerun."
            ),
        };
    }

    if let Some(fe) = err.downcast_ref::<FitError>() {
        return format!(
            "What happened: The decay fit failed ({fe}).\nLikely causes: Too few or noisy samples, or a window spanning a source change.\nHow to fix: Use a longer window or restrict the fit with --from."
        );
    }

    if is_config_error(err) {
        return format!(
            "What happened: Configuration is invalid ({err:#}).\nLikely causes: Out-of-range values or a typo in the TOML.\nHow to fix: Edit the config file and try again. See etc/crc15.toml for a sample."
        );
    }

    // String-based heuristics for errors coming from I/O
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("event log") {
        return format!(
            "What happened: {msg}.\nLikely causes: Missing file or no write permission on the log directory.\nHow to fix: Check the path and logging.event_log_dir, or pass --no-log."
        );
    }

    if lower.contains("no records") {
        return format!(
            "What happened: {msg}.\nLikely causes: The log is empty or every line was malformed.\nHow to fix: Point --log at a file written by `crc15 monitor`."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// 2 for configuration problems, 3 for device problems, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if is_config_error(err) {
        EXIT_CONFIG
    } else if is_device_error(err) {
        EXIT_DEVICE
    } else {
        EXIT_GENERIC
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if is_config_error(err) {
        "Config"
    } else if is_device_error(err) {
        "Device"
    } else if err.downcast_ref::<FitError>().is_some() {
        "Fit"
    } else {
        "Error"
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
