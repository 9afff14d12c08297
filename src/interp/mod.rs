//! Interpreter capability
//!
//! The bridge does not care which engine runs the user's code. Anything
//! that can run source text against a synchronous `StdIo` and honor a
//! cooperative interrupt source plugs in here. `MiniPython` is the
//! engine the playground ships with.

mod eval;
mod lexer;
mod parser;

pub use eval::{MiniPython, Value};
pub use lexer::SyntaxError;
pub use parser::{parse_program, Expr, Stmt};

use crate::bridge::{BridgeError, SharedBuffers};
use std::sync::Arc;
use thiserror::Error;

/// Terminal condition of a run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// Uncaught exception, already rendered as `Kind: message`
    #[error("{0}")]
    Exception(String),

    /// The cooperative interrupt fired
    #[error("KeyboardInterrupt")]
    Interrupted,

    /// The program called `exit()` / `quit()`
    #[error("SystemExit: {0}")]
    Exit(i32),

    /// The bridge contract was broken underneath the interpreter
    #[error("ProtocolViolation: {0}")]
    Bridge(#[from] BridgeError),
}

/// Synchronous standard streams as seen from inside a run.
///
/// Every call returns only once the other side has handled it.
pub trait StdIo {
    /// Next line of input, trailing newline included
    fn read_line(&mut self) -> Result<String, RunError>;

    /// Write to standard output, returns the number of bytes taken
    fn write_stdout(&mut self, bytes: &[u8]) -> Result<usize, RunError>;

    /// Write to standard error, returns the number of bytes taken
    fn write_stderr(&mut self, bytes: &[u8]) -> Result<usize, RunError>;
}

/// Handle on the shared interrupt flag, handed to the interpreter once
#[derive(Debug, Clone)]
pub struct InterruptSource {
    shared: Arc<SharedBuffers>,
}

impl InterruptSource {
    pub fn new(shared: Arc<SharedBuffers>) -> Self {
        Self { shared }
    }

    /// Raise `Interrupted` if the host has asked for a stop
    pub fn check(&self) -> Result<(), RunError> {
        if self.shared.interrupt.is_raised() {
            Err(RunError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// An embeddable interpreter
pub trait Interpreter {
    /// Short engine name for logs
    fn name(&self) -> &str;

    /// Wire the interrupt flag the engine polls at its own checkpoints
    fn set_interrupt_source(&mut self, source: InterruptSource);

    /// Run `source` to completion
    fn run(&mut self, source: &str, io: &mut dyn StdIo) -> Result<(), RunError>;
}

impl<T: Interpreter + ?Sized> Interpreter for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn set_interrupt_source(&mut self, source: InterruptSource) {
        (**self).set_interrupt_source(source)
    }

    fn run(&mut self, source: &str, io: &mut dyn StdIo) -> Result<(), RunError> {
        (**self).run(source, io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_source() {
        let shared = Arc::new(SharedBuffers::new(8));
        let source = InterruptSource::new(shared.clone());
        assert_eq!(source.check(), Ok(()));

        shared.interrupt.raise();
        assert_eq!(source.check(), Err(RunError::Interrupted));
    }

    #[test]
    fn test_run_error_display() {
        assert_eq!(RunError::Interrupted.to_string(), "KeyboardInterrupt");
        assert_eq!(
            RunError::from(BridgeError::NotWired).to_string(),
            "ProtocolViolation: shared buffers are not wired; blocking I/O is unavailable"
        );
    }
}
