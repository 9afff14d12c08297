//! Browser surface
//!
//! The page owns a `WebPlayground` on the main thread. The worker half is
//! handed to a Web Worker that instantiates this module against the same
//! shared `WebAssembly.Memory` and calls `workerEntry` with the handle.

use crate::bridge::{channel, SharedBuffers};
use crate::config::PlaygroundConfig;
use crate::host::HostController;
use crate::interp::{Interpreter, MiniPython};
use crate::logging;
use crate::worker::Worker;
use std::sync::Arc;
use wasm_bindgen::prelude::*;

type WebWorker = Worker<Box<dyn Interpreter + Send>>;

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Fresh buffers, channels and host, plus the worker half to hand off
fn wire(config: &PlaygroundConfig) -> Result<(HostController, Box<WebWorker>), JsValue> {
    let shared = Arc::new(SharedBuffers::new(config.stdin_capacity));
    let (to_worker, worker_inbox) = channel();
    let (worker_outbox, from_worker) = channel();
    let host = HostController::connect(shared, to_worker, from_worker).map_err(js_error)?;

    let interpreter: Box<dyn Interpreter + Send> = Box::new(MiniPython::new());
    let worker = Worker::new(interpreter, worker_inbox, worker_outbox);
    Ok((host, Box::new(worker)))
}

#[wasm_bindgen]
pub struct WebPlayground {
    config: PlaygroundConfig,
    host: HostController,
    pending_worker: Option<Box<WebWorker>>,
}

#[wasm_bindgen]
impl WebPlayground {
    /// `config_json` is an optional `PlaygroundConfig` document
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<WebPlayground, JsValue> {
        let config = match config_json {
            Some(json) => PlaygroundConfig::from_json(&json).map_err(js_error)?,
            None => PlaygroundConfig::default(),
        };

        let (host, worker) = wire(&config)?;
        logging::console_log(&format!(
            "[playground] stdin bus {} bytes",
            config.stdin_capacity
        ));

        Ok(WebPlayground {
            config,
            host,
            pending_worker: Some(worker),
        })
    }

    /// Ask the current worker to exit: closes its inbox and interrupts.
    ///
    /// A run that never reaches an interrupt checkpoint will not exit;
    /// the page must then call `Worker.terminate()` and `restart`.
    pub fn terminate(&mut self) {
        self.host.close();
        self.host.shared().request_interrupt();
    }

    /// Cancel-and-restart: terminate, then wire fresh buffers and a new
    /// worker half. Hand `takeWorkerHandle()` to a new Web Worker.
    ///
    /// The old Web Worker's state is not reclaimed if the page killed it
    /// mid-run.
    pub fn restart(&mut self) -> Result<(), JsValue> {
        self.terminate();
        let (host, worker) = wire(&self.config)?;
        self.host = host;
        self.pending_worker = Some(worker);
        logging::console_log("[playground] worker restarted");
        Ok(())
    }

    /// Opaque handle for `workerEntry`. Available once.
    #[wasm_bindgen(js_name = takeWorkerHandle)]
    pub fn take_worker_handle(&mut self) -> Option<usize> {
        self.pending_worker
            .take()
            .map(|worker| Box::into_raw(worker) as usize)
    }

    #[wasm_bindgen(getter, js_name = defaultSource)]
    pub fn default_source(&self) -> String {
        self.config.default_source.clone()
    }

    pub fn run(&mut self, source: &str) -> Result<(), JsValue> {
        self.host.start_run(source).map_err(js_error)
    }

    pub fn stop(&mut self) -> Result<(), JsValue> {
        self.host.request_stop().map_err(js_error)
    }

    /// Submit a line of input, newline added if missing
    pub fn submit(&mut self, text: &str) -> Result<(), JsValue> {
        self.host.submit(text).map_err(js_error)
    }

    #[wasm_bindgen(js_name = pushKeys)]
    pub fn push_keys(&mut self, text: &str) -> Result<(), JsValue> {
        self.host.push_keys(text).map_err(js_error)
    }

    /// Drain worker messages; call from `requestAnimationFrame` or a timer
    pub fn pump(&mut self) -> Result<usize, JsValue> {
        self.host.pump().map_err(js_error)
    }

    pub fn transcript(&self) -> String {
        self.host.console().text()
    }

    #[wasm_bindgen(js_name = entriesJson)]
    pub fn entries_json(&self) -> Result<String, JsValue> {
        self.host.console().to_json().map_err(js_error)
    }

    /// Text after the last newline, for an inline input prompt
    pub fn prompt(&self) -> String {
        self.host.console().current_prompt()
    }

    #[wasm_bindgen(js_name = isRunning)]
    pub fn is_running(&self) -> bool {
        self.host.is_running()
    }

    #[wasm_bindgen(js_name = isReady)]
    pub fn is_ready(&self) -> bool {
        self.host.is_ready()
    }

    #[wasm_bindgen(js_name = awaitingInput)]
    pub fn awaiting_input(&self) -> bool {
        self.host.is_awaiting_input()
    }
}

/// Run the worker loop. Called inside the Web Worker; returns when the
/// page drops its `WebPlayground`.
#[wasm_bindgen(js_name = workerEntry)]
pub fn worker_entry(handle: usize) -> Result<(), JsValue> {
    if handle == 0 {
        return Err(JsValue::from_str("null worker handle"));
    }
    // SAFETY: `handle` came from `take_worker_handle`, which leaks the box
    // exactly once and gives up ownership. Both contexts share one linear
    // memory, so the pointer is valid here.
    let worker = unsafe { Box::from_raw(handle as *mut WebWorker) };
    worker.run_loop().map_err(js_error)
}
