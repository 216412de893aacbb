use std::time::Duration;
use thiserror::Error;
#[derive(Debug, Error)]
pub enum DaqError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("invalid acquisition setup: {0}")]
    InvalidConfig(String),
    #[error("sampling session is not running")]
    NotRunning,
    #[error("timed out after {timeout:?} waiting for {requested} samples")]
    Timeout { requested: usize, timeout: Duration },
    #[error("short read: expected {expected} samples, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("driver library unavailable: {0}")]
    Library(String),
    #[error("{context} failed (DAQmx code {code}): {message}")]
    Driver {
        code: i32,
        context: &'static str,
        message: String,
    },
}
#[derive(Debug, Error)]
pub enum MotorError {
    #[error("motor controller {0} not found")]
    DeviceNotFound(String),
    #[error("invalid motor channel {0}")]
    InvalidChannel(u8),
    #[error("move did not finish within {0:?}")]
    MoveTimeout(Duration),
    #[error("stage never reported motion within {0:?}")]
    MotionNotStarted(Duration),
    #[error("motion fault: {0}")]
    Fault(String),
    #[error("driver library unavailable: {0}")]
    Library(String),
    #[error("{context} failed (Kinesis code {code})")]
    Driver { code: i32, context: &'static str },
}

/// Logs a release failure from a `Drop` impl, where it cannot be returned.
/// Returns whether the release succeeded.
pub fn log_release<E: std::fmt::Display>(what: &str, result: Result<(), E>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            log::warn!("failed to release {what}: {e}");
            false
        }
    }
}
