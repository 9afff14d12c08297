//! Session lifecycle
//!
//! One session owns one worker thread and the host controller wired to
//! it. Shared buffers live exactly as long as the worker they belong to:
//! `restart` throws both away and builds fresh ones.

use crate::bridge::{channel, BridgeError, BridgeResult, SharedBuffers};
use crate::config::PlaygroundConfig;
use crate::host::HostController;
use crate::interp::Interpreter;
use crate::worker::Worker;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Builds a fresh interpreter for each worker
pub type InterpreterFactory = Box<dyn Fn() -> Box<dyn Interpreter + Send> + Send>;

const PUMP_INTERVAL: Duration = Duration::from_millis(1);

pub struct Session {
    config: PlaygroundConfig,
    factory: InterpreterFactory,
    host: HostController,
    worker: Option<JoinHandle<BridgeResult<()>>>,
}

impl Session {
    /// Allocate buffers, spawn the worker, and wire it
    pub fn spawn<F>(config: PlaygroundConfig, factory: F) -> BridgeResult<Self>
    where
        F: Fn() -> Box<dyn Interpreter + Send> + Send + 'static,
    {
        let factory: InterpreterFactory = Box::new(factory);
        let (host, worker) = start_worker(&config, &factory)?;
        Ok(Self {
            config,
            factory,
            host,
            worker: Some(worker),
        })
    }

    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    pub fn host(&self) -> &HostController {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut HostController {
        &mut self.host
    }

    /// Pump worker messages until `done` holds or `timeout` passes.
    ///
    /// Returns whether `done` was satisfied. Meant for the native CLI and
    /// tests; a browser host pumps from its own event loop instead.
    pub fn pump_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&HostController) -> bool,
    ) -> BridgeResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.host.pump()?;
            if done(&self.host) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(PUMP_INTERVAL);
        }
    }

    /// Wait for `WorkerReady`
    pub fn wait_ready(&mut self, timeout: Duration) -> BridgeResult<bool> {
        self.pump_until(timeout, HostController::is_ready)
    }

    /// Stop the worker and join its thread
    pub fn terminate(mut self) -> BridgeResult<()> {
        self.stop_worker()
    }

    /// Cancel-and-restart: tear down the worker and its buffers, then
    /// bring up a fresh pair.
    pub fn restart(&mut self) -> BridgeResult<()> {
        if let Err(err) = self.stop_worker() {
            warn!(target: "session", error = %err, "previous worker ended badly");
        }
        let (host, worker) = start_worker(&self.config, &self.factory)?;
        self.host = host;
        self.worker = Some(worker);
        info!(target: "session", "worker restarted");
        Ok(())
    }

    fn stop_worker(&mut self) -> BridgeResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        // Closing first means a run the worker has not started yet is skipped
        self.host.close();
        self.host.shared().request_interrupt();

        let result = worker.join().map_err(|_| BridgeError::WorkerPanicked)?;
        info!(target: "session", "worker joined");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.stop_worker() {
            warn!(target: "session", error = %err, "worker shutdown failed");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("host", &self.host)
            .field("worker_alive", &self.worker.is_some())
            .finish()
    }
}

fn start_worker(
    config: &PlaygroundConfig,
    factory: &InterpreterFactory,
) -> BridgeResult<(HostController, JoinHandle<BridgeResult<()>>)> {
    let shared = Arc::new(SharedBuffers::new(config.stdin_capacity));
    let (to_worker, worker_inbox) = channel();
    let (worker_outbox, from_worker) = channel();

    // Queues SetSharedBuffers ahead of anything else the worker will see
    let host = HostController::connect(shared, to_worker, from_worker)?;

    let interpreter = factory();
    let worker = thread::Builder::new()
        .name(config.worker_name.clone())
        .spawn(move || {
            let result = Worker::new(interpreter, worker_inbox, worker_outbox).run_loop();
            if let Err(err) = &result {
                warn!(target: "worker", error = %err, "worker loop ended with error");
            }
            result
        })
        .map_err(|e| BridgeError::WorkerSpawn(e.to_string()))?;

    info!(target: "session", name = %config.worker_name, "worker spawned");
    Ok((host, worker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RunOutcome;
    use crate::interp::MiniPython;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn session() -> Session {
        Session::spawn(PlaygroundConfig::default(), || Box::new(MiniPython::new())).unwrap()
    }

    #[test]
    fn test_spawn_reports_ready() {
        let mut session = session();
        assert!(session.wait_ready(TIMEOUT).unwrap());
        session.terminate().unwrap();
    }

    #[test]
    fn test_terminate_mid_read() {
        let mut session = session();
        session.host_mut().start_run("input()").unwrap();
        assert!(
            session
                .pump_until(TIMEOUT, HostController::is_awaiting_input)
                .unwrap()
        );
        session.terminate().unwrap();
    }

    #[test]
    fn test_restart_gives_fresh_buffers() {
        let mut session = session();
        let before = session.host().shared().clone();

        session.restart().unwrap();
        assert!(!Arc::ptr_eq(&before, session.host().shared()));

        assert!(session.wait_ready(TIMEOUT).unwrap());
        session.host_mut().start_run("print(1)").unwrap();
        assert!(session.pump_until(TIMEOUT, |h| !h.is_running()).unwrap());
        assert_eq!(session.host().last_outcome(), Some(&RunOutcome::Succeeded));
    }
}
