//! playbridge - synchronous interpreter I/O for a browser code playground
//!
//! The interpreter runs on a worker thread and makes ordinary blocking
//! `read_line` / `write` calls. The UI thread never blocks. The two meet
//! through a small shared-memory rendezvous:
//!
//! - `bridge`: stdin bus, wait flag, interrupt flag, message protocol
//! - `worker`: the interpreter-facing side of every blocking call
//! - `host`: run controller, pending input, console transcript
//! - `session`: worker thread lifecycle (native)
//! - `interp`: the interpreter capability and the bundled engine
//!
//! Platform support:
//! - Browser (wasm32 with shared memory): `web::WebPlayground`
//! - Native: the `playground` CLI and the `serve` dev server

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod bridge;
pub mod config;
pub mod host;
pub mod interp;
pub mod logging;
pub mod worker;

#[cfg(not(target_arch = "wasm32"))]
pub mod session;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use bridge::{BridgeError, BridgeResult, SharedBuffers};
pub use config::{ConfigError, PlaygroundConfig};
pub use host::{HostController, RunOutcome, RunState};
pub use interp::{Interpreter, MiniPython, RunError, StdIo};

#[cfg(not(target_arch = "wasm32"))]
pub use session::Session;

/// Module start. Runs in the page and in every worker instance.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn main() {
    logging::init();
}
