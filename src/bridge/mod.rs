//! The cross-thread synchronous I/O bridge
//!
//! Two contexts share one `SharedBuffers`: the host (never blocks) and the
//! worker (runs the interpreter and may park). Control flows over two
//! message channels; data handoff timing is governed by the wait flag.
//!
//! Dependency order, leaves first:
//! - `flag` / `stdin_bus`: shared-memory registers
//! - `ipc` / `message`: the queued message protocol
//! - `crate::worker` and `crate::host`: the two adapters built on top

pub mod error;
pub mod flag;
pub mod ipc;
pub mod message;
pub mod stdin_bus;

pub use error::{BridgeError, BridgeResult};
pub use flag::{InterruptFlag, InterruptSignal, WaitFlag, WaitState};
pub use ipc::{channel, Receiver, SendError, Sender, TryRecvError};
pub use message::{HostMessage, WorkerMessage};
pub use stdin_bus::{StdinBus, DEFAULT_STDIN_CAPACITY};

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one `Run` request. Assigned by the host, starting at 1.
pub type RunId = u64;

/// All mutable state shared between the host and the worker.
///
/// Allocated once per worker context and never resized. Both sides hold
/// it through an `Arc`; nothing else crosses the boundary by reference.
#[derive(Debug)]
pub struct SharedBuffers {
    pub stdin: StdinBus,
    pub wait: WaitFlag,
    pub interrupt: InterruptFlag,
    /// Highest run id the host has stopped. A run at or below it must not
    /// execute, even if the worker picks it up after clearing the interrupt.
    stopped_run: AtomicU64,
}

impl SharedBuffers {
    pub fn new(stdin_capacity: usize) -> Self {
        Self {
            stdin: StdinBus::new(stdin_capacity),
            wait: WaitFlag::new(),
            interrupt: InterruptFlag::new(),
            stopped_run: AtomicU64::new(0),
        }
    }

    /// Raise the interrupt and force any parked wait to return.
    ///
    /// The only path that wakes the worker without new data.
    pub fn request_interrupt(&self) {
        self.interrupt.raise();
        self.wait.signal_ready();
    }

    /// Stop `run`: record it as stopped, then interrupt.
    ///
    /// The record comes first. A worker that clears the interrupt at the
    /// start of `run` then reads it back and skips the run.
    pub fn stop_run(&self, run: RunId) {
        self.stopped_run.fetch_max(run, Ordering::SeqCst);
        self.request_interrupt();
    }

    /// Whether the host stopped `run` (or a later one)
    pub fn is_run_stopped(&self, run: RunId) -> bool {
        self.stopped_run.load(Ordering::SeqCst) >= run
    }
}

impl Default for SharedBuffers {
    fn default() -> Self {
        Self::new(DEFAULT_STDIN_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_request_interrupt_wakes_waiter() {
        let shared = Arc::new(SharedBuffers::new(16));
        shared.wait.set_waiting();

        let worker = {
            let shared = shared.clone();
            thread::spawn(move || {
                shared.wait.block_until_ready();
                shared.interrupt.is_raised()
            })
        };

        shared.request_interrupt();
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_stop_run_is_recorded() {
        let shared = SharedBuffers::new(16);
        assert!(!shared.is_run_stopped(1));

        shared.stop_run(2);
        assert!(shared.is_run_stopped(1));
        assert!(shared.is_run_stopped(2));
        assert!(!shared.is_run_stopped(3));
        assert!(shared.interrupt.is_raised());

        // Stopping an older run never lowers the mark
        shared.stop_run(1);
        assert!(shared.is_run_stopped(2));
    }

    #[test]
    fn test_fresh_buffers() {
        let shared = SharedBuffers::new(32);
        assert_eq!(shared.stdin.capacity(), 32);
        assert_eq!(shared.wait.state(), WaitState::Ready);
        assert!(!shared.interrupt.is_raised());
    }
}
