//! Message protocol between the host and worker contexts
//!
//! One sum type per direction, matched exhaustively by the receiver.

use super::{RunId, SharedBuffers};
use std::sync::Arc;

/// Host -> Worker
#[derive(Debug, Clone)]
pub enum HostMessage {
    /// One-time wiring, sent once at startup
    SetSharedBuffers(Arc<SharedBuffers>),
    /// Begin executing; resets stdin state
    Run { run_id: RunId, source: String },
}

impl HostMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetSharedBuffers(_) => "setSharedBuffers",
            Self::Run { .. } => "run",
        }
    }
}

/// Worker -> Host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Interpreter finished initializing
    WorkerReady,
    /// Run completed without error
    ExecutionSucceeded,
    /// Run raised an uncaught condition
    ExecutionError { error: String },
    /// Run ended by the cooperative interrupt
    ExecutionCancelled,
    /// Worker is about to block waiting for a line
    StdinRequest,
    /// Worker produced output and is blocked awaiting the ack
    StdoutUpdate { output: Vec<u8> },
    /// Same, for the error stream
    StderrUpdate { output: Vec<u8> },
}

impl WorkerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkerReady => "workerReady",
            Self::ExecutionSucceeded => "executionSucceeded",
            Self::ExecutionError { .. } => "executionError",
            Self::ExecutionCancelled => "executionCancelled",
            Self::StdinRequest => "stdinRequest",
            Self::StdoutUpdate { .. } => "stdoutUpdate",
            Self::StderrUpdate { .. } => "stderrUpdate",
        }
    }

    /// Whether this message ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecutionSucceeded | Self::ExecutionError { .. } | Self::ExecutionCancelled
        )
    }

    /// Whether the worker is parked on the wait flag after posting this
    pub fn expects_ack(&self) -> bool {
        matches!(
            self,
            Self::StdinRequest | Self::StdoutUpdate { .. } | Self::StderrUpdate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_messages() {
        assert!(WorkerMessage::ExecutionSucceeded.is_terminal());
        assert!(WorkerMessage::ExecutionCancelled.is_terminal());
        assert!(WorkerMessage::ExecutionError {
            error: "boom".into()
        }
        .is_terminal());
        assert!(!WorkerMessage::StdinRequest.is_terminal());
        assert!(!WorkerMessage::WorkerReady.is_terminal());
    }

    #[test]
    fn test_ack_messages() {
        assert!(WorkerMessage::StdinRequest.expects_ack());
        assert!(WorkerMessage::StdoutUpdate { output: vec![] }.expects_ack());
        assert!(!WorkerMessage::ExecutionSucceeded.expects_ack());
    }

    #[test]
    fn test_kinds() {
        let run = HostMessage::Run {
            run_id: 1,
            source: "print(1)".into(),
        };
        assert_eq!(run.kind(), "run");
        assert_eq!(
            WorkerMessage::StderrUpdate { output: vec![] }.kind(),
            "stderrUpdate"
        );
    }
}
