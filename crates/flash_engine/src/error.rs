/// Error types for device and flashing operations
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlashError {
    /// No device answers on the backend protocol.
    #[error("device disconnected")]
    Disconnected,

    /// The device is present but has not authorized this host.
    #[error("device unauthorized, please allow USB debugging on the device")]
    Unauthorized,

    /// The operator cancelled the session. Sentinel, never logged as an error.
    #[error("cancelled")]
    Cancelled,

    /// The device refused the operation (e.g. OEM unlock toggle disabled).
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// The backend tool reported a plain failure.
    #[error("operation failed: {0}")]
    Failed(String),

    /// Benign absence of an optional resource.
    #[error("not available: {0}")]
    NotAvailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Multiple candidates match; the caller must disambiguate.
    #[error("ambiguous: {0}")]
    Ambiguous(String),

    /// The backend tool produced text we cannot classify. Carries the raw
    /// output so it can be classified in a future release.
    #[error("unrecognized tool output: {0}")]
    UnknownResponse(String),

    /// The operation requires a device state the device is not in.
    #[error("wrong device state: expected {expected}, got {actual}")]
    WrongState { expected: String, actual: String },

    #[error("manually booting recovery failed")]
    ManualBootFailed,

    /// The backend tool found the device but could not open it; usually a
    /// missing or wrong USB driver.
    #[error("backend tool failed to access the device")]
    DeviceAccess,

    #[error("command execution failed: {0}")]
    CommandFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("checksum verification failed for {0}")]
    ChecksumMismatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

impl FlashError {
    /// Disconnections and authorization failures clear themselves once the
    /// device reconnects; the polling task picks that up, so callers
    /// propagate these unchanged instead of retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlashError::Disconnected | FlashError::Unauthorized)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FlashError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, FlashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_disconnect_and_unauthorized() {
        assert!(FlashError::Disconnected.is_transient());
        assert!(FlashError::Unauthorized.is_transient());
        assert!(!FlashError::Cancelled.is_transient());
        assert!(!FlashError::UnknownResponse("x".to_string()).is_transient());
    }

    #[test]
    fn cancellation_is_a_sentinel_not_a_failure() {
        assert!(FlashError::Cancelled.is_cancelled());
        assert!(!FlashError::Disconnected.is_cancelled());
    }
}
