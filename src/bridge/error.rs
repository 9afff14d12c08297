//! Bridge error types
//!
//! Everything here is a protocol-contract violation: the bridge was used
//! in a way its handoff rules do not allow. These abort the current run.

use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A blocking call was made before `SetSharedBuffers` arrived
    #[error("shared buffers are not wired; blocking I/O is unavailable")]
    NotWired,

    /// A flush would exceed the stdin bus payload region
    #[error("stdin bus overflow: flush of {requested} bytes, only {available} available")]
    BusOverflow { requested: usize, available: usize },

    /// The bus held bytes that were not valid UTF-8
    #[error("stdin bus carried invalid UTF-8")]
    InvalidUtf8,

    /// The other side of a message channel is gone
    #[error("message channel closed")]
    ChannelClosed,

    /// `start_run` while a run is active
    #[error("a run is already active")]
    AlreadyRunning,

    /// `request_stop` with no active run
    #[error("no run is active")]
    NotRunning,

    /// The worker thread could not be started
    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(String),

    /// The worker thread panicked
    #[error("worker thread panicked")]
    WorkerPanicked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::BusOverflow {
            requested: 11,
            available: 10,
        };
        assert_eq!(
            err.to_string(),
            "stdin bus overflow: flush of 11 bytes, only 10 available"
        );
        assert_eq!(BridgeError::ChannelClosed.to_string(), "message channel closed");
    }
}
