//! Host context
//!
//! The run controller. Lives on the UI thread and must never block: it
//! drains worker messages with `pump`, answers rendezvous requests, and
//! moves complete lines of pending input onto the stdin bus.
//!
//! ```text
//! Idle --start_run--> Running --ExecutionSucceeded--> Idle (Succeeded)
//!                        |    --ExecutionError-----> Idle (Failed)
//!                        |    --ExecutionCancelled-> Idle (Interrupted)
//!                        +----request_stop---------> Idle (Interrupted)
//! ```

pub mod console;

pub use console::{Console, ConsoleEntry, ConsoleEntryKind, ListenerId};

use crate::bridge::{
    BridgeError, BridgeResult, HostMessage, Receiver, RunId, Sender, SharedBuffers,
    TryRecvError, WorkerMessage,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Host-visible run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

/// How the last run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
    Interrupted,
}

/// Incremental UTF-8 decoding for one output stream.
///
/// A character split across two writes is held back until it completes.
#[derive(Debug, Default)]
struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete sequence at the end: wait for more
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let held = rest.to_vec();
        self.pending = held;
        text
    }

    /// End of stream: whatever is still held can never complete
    fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

pub struct HostController {
    shared: Arc<SharedBuffers>,
    outbox: Sender<HostMessage>,
    inbox: Receiver<WorkerMessage>,
    state: RunState,
    /// Keystrokes not yet handed to the worker
    pending_input: String,
    console: Console,
    worker_ready: bool,
    /// Runs posted whose terminal message has not arrived yet. More than
    /// one means an earlier, stopped run is still winding down.
    runs_in_flight: usize,
    /// The worker posted `StdinRequest` and has not been fed since
    stdin_requested: bool,
    last_outcome: Option<RunOutcome>,
    /// Id of the most recently started run
    current_run: RunId,
    stdout: StreamDecoder,
    stderr: StreamDecoder,
}

impl HostController {
    /// Wire the worker: sends `SetSharedBuffers` once.
    pub fn connect(
        shared: Arc<SharedBuffers>,
        outbox: Sender<HostMessage>,
        inbox: Receiver<WorkerMessage>,
    ) -> BridgeResult<Self> {
        outbox
            .send(HostMessage::SetSharedBuffers(shared.clone()))
            .map_err(|_| BridgeError::ChannelClosed)?;

        Ok(Self {
            shared,
            outbox,
            inbox,
            state: RunState::Idle,
            pending_input: String::new(),
            console: Console::new(),
            worker_ready: false,
            runs_in_flight: 0,
            stdin_requested: false,
            last_outcome: None,
            current_run: 0,
            stdout: StreamDecoder::default(),
            stderr: StreamDecoder::default(),
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Whether the worker has reported `WorkerReady`
    pub fn is_ready(&self) -> bool {
        self.worker_ready
    }

    /// Whether the worker is still executing something, stopped runs included
    pub fn is_worker_busy(&self) -> bool {
        self.runs_in_flight > 0
    }

    /// Whether the worker is parked waiting for a line
    pub fn is_awaiting_input(&self) -> bool {
        self.stdin_requested
    }

    pub fn last_outcome(&self) -> Option<&RunOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    pub fn shared(&self) -> &Arc<SharedBuffers> {
        &self.shared
    }

    /// Id of the most recent run, 0 before the first
    pub fn current_run(&self) -> RunId {
        self.current_run
    }

    /// Begin a run. Only valid from `Idle`.
    pub fn start_run(&mut self, source: &str) -> BridgeResult<()> {
        if self.state == RunState::Running {
            return Err(BridgeError::AlreadyRunning);
        }

        self.pending_input.clear();
        self.console.clear();
        self.stdout.reset();
        self.stderr.reset();
        self.stdin_requested = false;
        if self.runs_in_flight == 0 {
            // A stopped run still winding down must keep seeing its
            // interrupt; the worker clears both at its own run start
            self.shared.stdin.reset();
            self.shared.interrupt.clear();
        }

        let run_id = self.current_run + 1;
        self.outbox
            .send(HostMessage::Run {
                run_id,
                source: source.to_string(),
            })
            .map_err(|_| BridgeError::ChannelClosed)?;

        self.current_run = run_id;
        self.state = RunState::Running;
        self.runs_in_flight += 1;
        self.last_outcome = None;
        info!(target: "host", run_id, bytes = source.len(), "run requested");
        Ok(())
    }

    /// Stop the active run. Returns to `Idle` without waiting for the worker.
    pub fn request_stop(&mut self) -> BridgeResult<()> {
        if self.state != RunState::Running {
            return Err(BridgeError::NotRunning);
        }
        // Recorded by id, so a run the worker has not picked up yet is
        // skipped rather than started with a cleared interrupt
        self.shared.stop_run(self.current_run);
        self.state = RunState::Idle;
        self.stdin_requested = false;
        self.last_outcome = Some(RunOutcome::Interrupted);
        info!(target: "host", "stop requested");
        Ok(())
    }

    /// Raw keystrokes from the UI
    pub fn push_keys(&mut self, text: &str) -> BridgeResult<()> {
        self.pending_input.push_str(text);
        self.try_flush_pending_input().map(|_| ())
    }

    /// An explicit submit: always terminates the line
    pub fn submit(&mut self, text: &str) -> BridgeResult<()> {
        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.console.append(ConsoleEntryKind::Input, &line);
        self.pending_input.push_str(&line);
        self.try_flush_pending_input().map(|_| ())
    }

    /// Move every complete line of pending input onto the bus and wake
    /// the worker. Returns the number of bytes flushed.
    ///
    /// No-op unless the worker is parked on a stdin request. A flush that
    /// does not fit the bus aborts the run.
    pub fn try_flush_pending_input(&mut self) -> BridgeResult<usize> {
        if !self.stdin_requested || !self.shared.wait.is_waiting() {
            return Ok(0);
        }
        let Some(last_newline) = self.pending_input.rfind('\n') else {
            return Ok(0);
        };
        let cut = last_newline + 1;

        if let Err(err) = self.shared.stdin.append(&self.pending_input.as_bytes()[..cut]) {
            self.abort_run(&err);
            return Err(err);
        }
        self.pending_input.drain(..cut);
        self.stdin_requested = false;
        self.shared.wait.signal_ready();
        debug!(target: "host", bytes = cut, "flushed pending input");
        Ok(cut)
    }

    fn abort_run(&mut self, err: &BridgeError) {
        warn!(target: "host", error = %err, "protocol violation, aborting run");
        let diagnostic = format!("ProtocolViolation: {}", err);
        self.console
            .append(ConsoleEntryKind::Error, &format!("{}\n", diagnostic));
        self.shared.stop_run(self.current_run);
        self.stdin_requested = false;
        if self.state == RunState::Running {
            self.state = RunState::Idle;
        }
        self.last_outcome = Some(RunOutcome::Failed(diagnostic));
    }

    /// Output belongs to the live run only: nothing stopped, nothing stale
    fn accepting_output(&self) -> bool {
        self.state == RunState::Running && self.runs_in_flight == 1
    }

    /// Apply one worker message
    pub fn handle(&mut self, message: WorkerMessage) -> BridgeResult<()> {
        debug!(target: "host", kind = message.kind(), "worker message");
        match message {
            WorkerMessage::WorkerReady => {
                self.worker_ready = true;
                info!(target: "host", "worker ready");
            }
            WorkerMessage::StdinRequest => {
                if !self.accepting_output() {
                    self.release_stale();
                } else if self.shared.interrupt.is_raised() {
                    // Wake it so the interrupt check can end the run
                    self.shared.wait.signal_ready();
                } else {
                    self.stdin_requested = true;
                    self.try_flush_pending_input()?;
                }
            }
            WorkerMessage::StdoutUpdate { output } => {
                if self.accepting_output() {
                    let text = self.stdout.decode(&output);
                    self.console.append(ConsoleEntryKind::Output, &text);
                    self.shared.wait.signal_ready();
                } else {
                    self.release_stale();
                }
            }
            WorkerMessage::StderrUpdate { output } => {
                if self.accepting_output() {
                    let text = self.stderr.decode(&output);
                    self.console.append(ConsoleEntryKind::Error, &text);
                    self.shared.wait.signal_ready();
                } else {
                    self.release_stale();
                }
            }
            WorkerMessage::ExecutionSucceeded => self.finish(RunOutcome::Succeeded),
            WorkerMessage::ExecutionCancelled => self.finish(RunOutcome::Interrupted),
            WorkerMessage::ExecutionError { error } => self.finish(RunOutcome::Failed(error)),
        }
        Ok(())
    }

    /// Ack a request from a run the host has stopped or abandoned.
    ///
    /// Re-raises the interrupt with the release so the woken run ends at
    /// its next check instead of carrying on.
    fn release_stale(&mut self) {
        debug!(target: "host", "releasing stale run");
        self.shared.request_interrupt();
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.runs_in_flight = self.runs_in_flight.saturating_sub(1);
        if self.runs_in_flight > 0 {
            debug!(target: "host", "stale run finished");
            return;
        }
        self.stdin_requested = false;
        if self.state != RunState::Running {
            // Already stopped or aborted locally; keep that outcome
            return;
        }

        self.state = RunState::Idle;
        let tail = self.stdout.finish();
        self.console.append(ConsoleEntryKind::Output, &tail);
        let tail = self.stderr.finish();
        self.console.append(ConsoleEntryKind::Error, &tail);
        if let RunOutcome::Failed(error) = &outcome {
            let mut text = error.clone();
            if !text.ends_with('\n') {
                text.push('\n');
            }
            self.console.append(ConsoleEntryKind::Error, &text);
        }
        info!(target: "host", outcome = ?outcome, "run finished");
        self.last_outcome = Some(outcome);
    }

    /// Drain every queued worker message without blocking.
    ///
    /// Returns how many were handled. A closed channel means the worker is
    /// gone: any active run is failed and `ChannelClosed` returned.
    pub fn pump(&mut self) -> BridgeResult<usize> {
        let mut handled = 0;
        loop {
            match self.inbox.try_recv() {
                Ok(message) => {
                    self.handle(message)?;
                    handled += 1;
                }
                Err(TryRecvError::Empty) => return Ok(handled),
                Err(TryRecvError::Closed) => {
                    if self.state == RunState::Running {
                        self.state = RunState::Idle;
                        self.last_outcome =
                            Some(RunOutcome::Failed("worker terminated".to_string()));
                    }
                    self.runs_in_flight = 0;
                    self.worker_ready = false;
                    return Err(BridgeError::ChannelClosed);
                }
            }
        }
    }

    /// Close the channel to the worker so its loop ends once drained
    pub fn close(&self) {
        self.outbox.close();
    }
}

impl std::fmt::Debug for HostController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostController")
            .field("state", &self.state)
            .field("runs_in_flight", &self.runs_in_flight)
            .field("stdin_requested", &self.stdin_requested)
            .field("current_run", &self.current_run)
            .field("pending_input", &self.pending_input)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel;

    /// Host wired to hand-driven worker channels
    struct Harness {
        host: HostController,
        worker_inbox: Receiver<HostMessage>,
        worker_outbox: Sender<WorkerMessage>,
        shared: Arc<SharedBuffers>,
    }

    fn harness(capacity: usize) -> Harness {
        let shared = Arc::new(SharedBuffers::new(capacity));
        let (to_worker, worker_inbox) = channel();
        let (worker_outbox, from_worker) = channel();
        let host = HostController::connect(shared.clone(), to_worker, from_worker).unwrap();
        assert!(matches!(
            worker_inbox.try_recv(),
            Ok(HostMessage::SetSharedBuffers(_))
        ));
        Harness {
            host,
            worker_inbox,
            worker_outbox,
            shared,
        }
    }

    impl Harness {
        /// What the worker does before blocking on a read
        fn request_stdin(&mut self) {
            self.shared.wait.set_waiting();
            self.worker_outbox.send(WorkerMessage::StdinRequest).unwrap();
            self.host.pump().unwrap();
        }
    }

    #[test]
    fn test_start_run_posts_source() {
        let mut h = harness(64);
        h.host.start_run("print('hi')").unwrap();

        assert_eq!(h.host.state(), RunState::Running);
        match h.worker_inbox.try_recv() {
            Ok(HostMessage::Run { run_id, source }) => {
                assert_eq!(run_id, 1);
                assert_eq!(source, "print('hi')");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(h.host.start_run("x"), Err(BridgeError::AlreadyRunning));
    }

    #[test]
    fn test_output_is_acked() {
        let mut h = harness(64);
        h.host.start_run("print('hi')").unwrap();

        h.shared.wait.set_waiting();
        h.worker_outbox
            .send(WorkerMessage::StdoutUpdate {
                output: b"hi\n".to_vec(),
            })
            .unwrap();
        h.worker_outbox.send(WorkerMessage::ExecutionSucceeded).unwrap();

        assert_eq!(h.host.pump().unwrap(), 2);
        assert!(!h.shared.wait.is_waiting());
        assert_eq!(h.host.console().text(), "hi\n");
        assert_eq!(h.host.state(), RunState::Idle);
        assert_eq!(h.host.last_outcome(), Some(&RunOutcome::Succeeded));
    }

    #[test]
    fn test_no_flush_without_request() {
        let mut h = harness(64);
        h.host.start_run("x = input()").unwrap();

        h.host.push_keys("42\n").unwrap();
        assert!(h.shared.stdin.is_empty());
        assert_eq!(h.host.pending_input(), "42\n");
    }

    #[test]
    fn test_partial_line_stays_pending() {
        let mut h = harness(64);
        h.host.start_run("x = input()").unwrap();
        h.request_stdin();
        assert!(h.host.is_awaiting_input());

        h.host.push_keys("4").unwrap();
        h.host.push_keys("2").unwrap();
        assert!(h.shared.stdin.is_empty());
        assert!(h.shared.wait.is_waiting());

        h.host.push_keys("\nnext").unwrap();
        assert_eq!(h.shared.stdin.drain_text().unwrap(), "42\n");
        assert_eq!(h.host.pending_input(), "next");
        assert!(!h.shared.wait.is_waiting());
        assert!(!h.host.is_awaiting_input());
    }

    #[test]
    fn test_request_with_pending_line_flushes_immediately() {
        let mut h = harness(64);
        h.host.start_run("x = input()").unwrap();
        h.host.push_keys("a\nb\npartial").unwrap();

        h.request_stdin();
        assert_eq!(h.shared.stdin.drain_text().unwrap(), "a\nb\n");
        assert_eq!(h.host.pending_input(), "partial");
    }

    #[test]
    fn test_submit_terminates_and_echoes() {
        let mut h = harness(64);
        h.host.start_run("x = input()").unwrap();
        h.request_stdin();

        h.host.submit("42").unwrap();
        assert_eq!(h.shared.stdin.drain_text().unwrap(), "42\n");
        assert_eq!(h.host.console().text_of(ConsoleEntryKind::Input), "42\n");
    }

    #[test]
    fn test_overflow_aborts_run() {
        let mut h = harness(10);
        h.host.start_run("x = input()").unwrap();
        h.request_stdin();

        let err = h.host.submit("0123456789").unwrap_err();
        assert_eq!(
            err,
            BridgeError::BusOverflow {
                requested: 11,
                available: 10
            }
        );
        assert!(h.shared.stdin.is_empty());
        assert!(h.shared.interrupt.is_raised());
        assert!(!h.shared.wait.is_waiting());
        assert_eq!(h.host.state(), RunState::Idle);
        assert!(matches!(h.host.last_outcome(), Some(RunOutcome::Failed(_))));
    }

    #[test]
    fn test_stop_is_optimistic() {
        let mut h = harness(64);
        h.host.start_run("x = input()").unwrap();
        h.request_stdin();

        h.host.request_stop().unwrap();
        assert_eq!(h.host.state(), RunState::Idle);
        assert!(h.shared.interrupt.is_raised());
        assert!(!h.shared.wait.is_waiting());
        assert!(h.host.is_worker_busy());

        // The worker's acknowledgement does not add an error
        h.worker_outbox.send(WorkerMessage::ExecutionCancelled).unwrap();
        h.host.pump().unwrap();
        assert!(!h.host.is_worker_busy());
        assert_eq!(h.host.last_outcome(), Some(&RunOutcome::Interrupted));
        assert!(h.host.console().text_of(ConsoleEntryKind::Error).is_empty());
        assert_eq!(h.host.request_stop(), Err(BridgeError::NotRunning));
    }

    #[test]
    fn test_stale_output_is_acked_but_dropped() {
        let mut h = harness(64);
        h.host.start_run("while True:\n    print(1)").unwrap();
        h.host.request_stop().unwrap();

        h.shared.wait.set_waiting();
        h.worker_outbox
            .send(WorkerMessage::StdoutUpdate {
                output: b"1\n".to_vec(),
            })
            .unwrap();
        h.host.pump().unwrap();

        assert!(h.host.console().is_empty());
        assert!(!h.shared.wait.is_waiting());
    }

    #[test]
    fn test_restart_while_previous_run_winds_down() {
        let mut h = harness(64);
        h.host.start_run("first").unwrap();
        h.host.request_stop().unwrap();
        h.host.start_run("second").unwrap();

        // Interrupt stays raised for the first run
        assert!(h.shared.interrupt.is_raised());

        h.worker_outbox.send(WorkerMessage::ExecutionCancelled).unwrap();
        h.host.pump().unwrap();
        assert!(h.host.is_running());

        h.worker_outbox.send(WorkerMessage::ExecutionSucceeded).unwrap();
        h.host.pump().unwrap();
        assert_eq!(h.host.last_outcome(), Some(&RunOutcome::Succeeded));
    }

    #[test]
    fn test_error_appends_to_console() {
        let mut h = harness(64);
        h.host.start_run("print(y)").unwrap();
        h.worker_outbox
            .send(WorkerMessage::ExecutionError {
                error: "NameError: name 'y' is not defined".into(),
            })
            .unwrap();
        h.host.pump().unwrap();

        assert_eq!(
            h.host.console().text_of(ConsoleEntryKind::Error),
            "NameError: name 'y' is not defined\n"
        );
        assert_eq!(h.host.state(), RunState::Idle);
    }

    #[test]
    fn test_closed_worker_channel_fails_run() {
        let mut h = harness(64);
        h.host.start_run("x").unwrap();
        h.worker_outbox.close();

        assert_eq!(h.host.pump(), Err(BridgeError::ChannelClosed));
        assert_eq!(h.host.state(), RunState::Idle);
        assert!(matches!(h.host.last_outcome(), Some(RunOutcome::Failed(_))));
    }

    #[test]
    fn test_stop_records_run_id() {
        let mut h = harness(64);
        h.host.start_run("first").unwrap();
        h.host.request_stop().unwrap();
        h.host.start_run("second").unwrap();
        assert_eq!(h.host.current_run(), 2);

        assert!(h.shared.is_run_stopped(1));
        assert!(!h.shared.is_run_stopped(2));

        h.host.request_stop().unwrap();
        assert!(h.shared.is_run_stopped(2));
    }

    #[test]
    fn test_stale_request_reraises_interrupt() {
        let mut h = harness(64);
        h.host.start_run("while True:\n    print(1)").unwrap();
        h.host.request_stop().unwrap();

        // Worker cleared the flag at run start before the stop landed
        h.shared.interrupt.clear();
        h.shared.wait.set_waiting();
        h.worker_outbox.send(WorkerMessage::StdinRequest).unwrap();
        h.host.pump().unwrap();

        assert!(h.shared.interrupt.is_raised());
        assert!(!h.shared.wait.is_waiting());
        assert!(!h.host.is_awaiting_input());
    }

    #[test]
    fn test_multibyte_char_split_across_writes() {
        let mut h = harness(64);
        h.host.start_run("print('é')").unwrap();

        let bytes = "é\n".as_bytes();
        for chunk in [&bytes[..1], &bytes[1..]] {
            h.shared.wait.set_waiting();
            h.worker_outbox
                .send(WorkerMessage::StdoutUpdate {
                    output: chunk.to_vec(),
                })
                .unwrap();
            h.host.pump().unwrap();
            assert!(!h.shared.wait.is_waiting());
        }

        assert_eq!(h.host.console().text(), "é\n");
    }

    #[test]
    fn test_truncated_char_at_run_end() {
        let mut h = harness(64);
        h.host.start_run("x").unwrap();
        h.worker_outbox
            .send(WorkerMessage::StderrUpdate {
                output: vec![b'a', 0xE2, 0x82],
            })
            .unwrap();
        h.worker_outbox.send(WorkerMessage::ExecutionSucceeded).unwrap();
        h.host.pump().unwrap();

        assert_eq!(
            h.host.console().text_of(ConsoleEntryKind::Error),
            "a\u{FFFD}"
        );
    }

    #[test]
    fn test_invalid_byte_is_replaced_inline() {
        let mut decoder = StreamDecoder::default();
        assert_eq!(decoder.decode(&[b'o', 0xFF, b'k']), "o\u{FFFD}k");
        assert_eq!(decoder.finish(), "");
    }
}
