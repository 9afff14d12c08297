//! Worker context
//!
//! Owns the interpreter. Receives `HostMessage`s, runs source text, and
//! presents the interpreter with synchronous standard streams backed by
//! the shared-memory rendezvous.
//!
//! Every blocking call follows the same cycle:
//!
//! 1. arm the wait flag, then check the interrupt
//! 2. post the request (`StdinRequest` / `StdoutUpdate` / `StderrUpdate`)
//! 3. park until the host releases the flag
//! 4. check the interrupt before handing control back
//!
//! The flag is armed before the post so a host that answers immediately
//! can never release it ahead of the arm.

use crate::bridge::{
    BridgeError, BridgeResult, HostMessage, Receiver, RunId, Sender, SharedBuffers, WorkerMessage,
};
use crate::interp::{InterruptSource, Interpreter, RunError, StdIo};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Standard streams for one run, as seen by the interpreter
pub struct WorkerIo {
    shared: Option<Arc<SharedBuffers>>,
    interrupt: Option<InterruptSource>,
    outbox: Sender<WorkerMessage>,
    /// Decoded stdin not yet handed to the interpreter
    local_stdin: String,
}

impl WorkerIo {
    pub fn new(shared: Option<Arc<SharedBuffers>>, outbox: Sender<WorkerMessage>) -> Self {
        let interrupt = shared.clone().map(InterruptSource::new);
        Self {
            shared,
            interrupt,
            outbox,
            local_stdin: String::new(),
        }
    }

    /// Buffered input that has crossed the bus but not been read yet
    pub fn buffered_input(&self) -> &str {
        &self.local_stdin
    }

    fn check_interrupt(&self) -> Result<(), RunError> {
        match &self.interrupt {
            Some(source) => source.check(),
            None => Ok(()),
        }
    }

    /// One full rendezvous cycle for `message`
    fn rendezvous(&self, message: WorkerMessage) -> Result<(), RunError> {
        let shared = self.shared.as_ref().ok_or(BridgeError::NotWired)?;

        let kind = message.kind();
        shared.wait.set_waiting();
        // A stop that landed before the arm has already released the flag
        if let Err(err) = self.check_interrupt() {
            shared.wait.signal_ready();
            return Err(err);
        }
        if self.outbox.send(message).is_err() {
            shared.wait.signal_ready();
            return Err(BridgeError::ChannelClosed.into());
        }
        debug!(target: "worker", kind, "parked");
        shared.wait.block_until_ready();
        debug!(target: "worker", kind, "woke");

        self.check_interrupt()
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.local_stdin.find('\n')? + 1;
        let rest = self.local_stdin.split_off(end);
        Some(std::mem::replace(&mut self.local_stdin, rest))
    }
}

impl StdIo for WorkerIo {
    fn read_line(&mut self) -> Result<String, RunError> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            self.rendezvous(WorkerMessage::StdinRequest)?;

            let shared = self.shared.as_ref().ok_or(BridgeError::NotWired)?;
            let text = shared.stdin.drain_text()?;
            debug!(target: "worker", bytes = text.len(), "drained stdin bus");
            self.local_stdin.push_str(&text);
        }
    }

    fn write_stdout(&mut self, bytes: &[u8]) -> Result<usize, RunError> {
        self.rendezvous(WorkerMessage::StdoutUpdate {
            output: bytes.to_vec(),
        })?;
        Ok(bytes.len())
    }

    fn write_stderr(&mut self, bytes: &[u8]) -> Result<usize, RunError> {
        self.rendezvous(WorkerMessage::StderrUpdate {
            output: bytes.to_vec(),
        })?;
        Ok(bytes.len())
    }
}

/// The worker loop around one interpreter instance
pub struct Worker<I: Interpreter> {
    interpreter: I,
    inbox: Receiver<HostMessage>,
    outbox: Sender<WorkerMessage>,
    shared: Option<Arc<SharedBuffers>>,
}

impl<I: Interpreter> Worker<I> {
    pub fn new(interpreter: I, inbox: Receiver<HostMessage>, outbox: Sender<WorkerMessage>) -> Self {
        Self {
            interpreter,
            inbox,
            outbox,
            shared: None,
        }
    }

    fn post(&self, message: WorkerMessage) -> BridgeResult<()> {
        self.outbox
            .send(message)
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Announce readiness, then serve messages until the inbox closes.
    ///
    /// Returns an error only when the host side has gone away mid-run.
    pub fn run_loop(mut self) -> BridgeResult<()> {
        info!(target: "worker", engine = self.interpreter.name(), "worker ready");
        self.post(WorkerMessage::WorkerReady)?;

        while let Some(message) = self.inbox.recv() {
            self.handle(message)?;
        }
        info!(target: "worker", "inbox closed, worker exiting");
        Ok(())
    }

    /// Apply a single host message
    pub fn handle(&mut self, message: HostMessage) -> BridgeResult<()> {
        match message {
            HostMessage::SetSharedBuffers(shared) => {
                if self.shared.is_some() {
                    warn!(target: "worker", "shared buffers wired twice, replacing");
                }
                self.interpreter
                    .set_interrupt_source(InterruptSource::new(shared.clone()));
                self.shared = Some(shared);
                Ok(())
            }
            HostMessage::Run { run_id, source } => self.execute(run_id, &source),
        }
    }

    fn execute(&mut self, run_id: RunId, source: &str) -> BridgeResult<()> {
        if let Some(shared) = &self.shared {
            shared.interrupt.clear();
            shared.stdin.reset();
        }
        // Both checked after the clear, so a stop or terminate racing with
        // this run start either skips it or leaves the interrupt raised
        if self.inbox.is_closed() {
            debug!(target: "worker", "inbox closed, skipping queued run");
            return Ok(());
        }
        if self
            .shared
            .as_ref()
            .is_some_and(|shared| shared.is_run_stopped(run_id))
        {
            debug!(target: "worker", run_id, "run stopped before it started");
            return self.post(WorkerMessage::ExecutionCancelled);
        }

        info!(target: "worker", run_id, bytes = source.len(), "run started");
        let mut io = WorkerIo::new(self.shared.clone(), self.outbox.clone());
        let result = self.interpreter.run(source, &mut io);

        let message = match result {
            Ok(()) => WorkerMessage::ExecutionSucceeded,
            Err(RunError::Exit(code)) => {
                debug!(target: "worker", code, "program exited");
                WorkerMessage::ExecutionSucceeded
            }
            Err(RunError::Interrupted) => WorkerMessage::ExecutionCancelled,
            Err(RunError::Exception(error)) => WorkerMessage::ExecutionError { error },
            Err(RunError::Bridge(BridgeError::ChannelClosed)) => {
                return Err(BridgeError::ChannelClosed);
            }
            Err(err @ RunError::Bridge(_)) => {
                warn!(target: "worker", error = %err, "run aborted");
                WorkerMessage::ExecutionError {
                    error: err.to_string(),
                }
            }
        };
        info!(target: "worker", outcome = message.kind(), "run finished");
        self.post(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{channel, TryRecvError};
    use std::thread;

    /// Minimal stand-in for the host: acks every request, feeding `lines`
    fn fake_host(
        shared: Arc<SharedBuffers>,
        inbox: Receiver<WorkerMessage>,
        mut lines: Vec<&'static str>,
    ) -> thread::JoinHandle<Vec<WorkerMessage>> {
        lines.reverse();
        thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(message) = inbox.recv() {
                match &message {
                    WorkerMessage::StdinRequest => {
                        if let Some(line) = lines.pop() {
                            shared.stdin.append(line.as_bytes()).unwrap();
                        }
                        shared.wait.signal_ready();
                    }
                    WorkerMessage::StdoutUpdate { .. } | WorkerMessage::StderrUpdate { .. } => {
                        shared.wait.signal_ready();
                    }
                    _ => {}
                }
                let done = message.is_terminal();
                seen.push(message);
                if done {
                    break;
                }
            }
            seen
        })
    }

    #[test]
    fn test_read_line_serves_buffered_lines_first() {
        let shared = Arc::new(SharedBuffers::new(64));
        let (tx, rx) = channel();
        let host = fake_host(shared.clone(), rx, vec!["one\ntwo\n"]);

        let mut io = WorkerIo::new(Some(shared), tx.clone());
        assert_eq!(io.read_line().unwrap(), "one\n");
        // Second line comes from the local buffer, no new request
        assert_eq!(io.buffered_input(), "two\n");
        assert_eq!(io.read_line().unwrap(), "two\n");

        tx.send(WorkerMessage::ExecutionSucceeded).unwrap();
        let seen = host.join().unwrap();
        let requests = seen
            .iter()
            .filter(|m| **m == WorkerMessage::StdinRequest)
            .count();
        assert_eq!(requests, 1);
    }

    #[test]
    fn test_blocking_call_without_wiring() {
        let (tx, rx) = channel();
        let mut io = WorkerIo::new(None, tx);
        assert_eq!(
            io.write_stdout(b"x"),
            Err(RunError::Bridge(BridgeError::NotWired))
        );
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_pending_interrupt_skips_the_wait() {
        let shared = Arc::new(SharedBuffers::new(8));
        shared.interrupt.raise();
        let (tx, rx) = channel();

        let mut io = WorkerIo::new(Some(shared), tx);
        assert_eq!(io.read_line(), Err(RunError::Interrupted));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_closed_outbox_is_reported() {
        let shared = Arc::new(SharedBuffers::new(8));
        let (tx, rx) = channel();
        rx.close();

        let mut io = WorkerIo::new(Some(shared.clone()), tx);
        assert_eq!(
            io.write_stdout(b"x"),
            Err(RunError::Bridge(BridgeError::ChannelClosed))
        );
        assert!(!shared.wait.is_waiting());
    }

    #[test]
    fn test_run_without_wiring_reports_protocol_violation() {
        use crate::interp::MiniPython;

        let (_to_worker, worker_inbox) = channel();
        let (worker_outbox, from_worker) = channel();
        let mut worker = Worker::new(MiniPython::new(), worker_inbox, worker_outbox);

        worker
            .handle(HostMessage::Run {
                run_id: 1,
                source: "print('hi')".into(),
            })
            .unwrap();

        match from_worker.try_recv() {
            Ok(WorkerMessage::ExecutionError { error }) => {
                assert!(error.starts_with("ProtocolViolation"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_exit_counts_as_success() {
        use crate::interp::MiniPython;

        let shared = Arc::new(SharedBuffers::new(8));
        let (_to_worker, worker_inbox) = channel();
        let (worker_outbox, from_worker) = channel();
        let mut worker = Worker::new(MiniPython::new(), worker_inbox, worker_outbox);

        worker.handle(HostMessage::SetSharedBuffers(shared)).unwrap();
        worker
            .handle(HostMessage::Run {
                run_id: 1,
                source: "exit()".into(),
            })
            .unwrap();

        assert_eq!(from_worker.try_recv(), Ok(WorkerMessage::ExecutionSucceeded));
    }

    #[test]
    fn test_run_stopped_before_start_is_skipped() {
        use crate::interp::MiniPython;

        let shared = Arc::new(SharedBuffers::new(8));
        let (_to_worker, worker_inbox) = channel();
        let (worker_outbox, from_worker) = channel();
        let mut worker = Worker::new(MiniPython::new(), worker_inbox, worker_outbox);
        worker
            .handle(HostMessage::SetSharedBuffers(shared.clone()))
            .unwrap();

        shared.stop_run(1);
        worker
            .handle(HostMessage::Run {
                run_id: 1,
                source: "while True:\n    pass".into(),
            })
            .unwrap();
        assert_eq!(from_worker.try_recv(), Ok(WorkerMessage::ExecutionCancelled));

        // A later run is unaffected by the earlier stop
        worker
            .handle(HostMessage::Run {
                run_id: 2,
                source: "x = 1".into(),
            })
            .unwrap();
        assert_eq!(from_worker.try_recv(), Ok(WorkerMessage::ExecutionSucceeded));
    }
}
