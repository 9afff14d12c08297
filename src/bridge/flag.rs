//! Single-word signaling registers
//!
//! The wait flag is the rendezvous between the two contexts: the worker
//! arms it (`set_waiting`) and parks on it (`block_until_ready`), the host
//! releases it (`signal_ready`) once its side of the handoff is committed.
//!
//! The word itself is the source of truth. The host side never takes a
//! lock: it stores `Ready` and unparks the registered waiter. Only the
//! worker ever parks. All accesses to the wait and interrupt words are
//! `SeqCst`, so an interrupt raised before the worker arms is always seen
//! by the check the worker makes right after arming.

use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::OnceLock;
use std::thread::{self, Thread};
use std::time::Duration;
use tracing::debug;

/// Poll interval for a thread that is not the registered waiter
const FOREIGN_WAITER_POLL: Duration = Duration::from_millis(1);

/// Wait flag states, with the numeric encoding stored in the word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WaitState {
    /// Worker is parked (or about to park) and the host owns the next move
    Waiting = 0,
    /// No handoff pending
    Ready = 1,
}

impl WaitState {
    fn from_word(word: u32) -> Self {
        if word == WaitState::Waiting as u32 {
            WaitState::Waiting
        } else {
            WaitState::Ready
        }
    }
}

/// The wait flag register
pub struct WaitFlag {
    word: AtomicU32,
    /// The worker thread, registered the first time it parks
    waiter: OnceLock<Thread>,
}

impl WaitFlag {
    pub fn new() -> Self {
        Self {
            word: AtomicU32::new(WaitState::Ready as u32),
            waiter: OnceLock::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> WaitState {
        WaitState::from_word(self.word.load(Ordering::SeqCst))
    }

    pub fn is_waiting(&self) -> bool {
        self.state() == WaitState::Waiting
    }

    /// Arm the flag. Called by the worker before it publishes a request.
    pub fn set_waiting(&self) {
        self.word.store(WaitState::Waiting as u32, Ordering::SeqCst);
        debug!(target: "bridge::flag", "wait flag armed");
    }

    /// Park the calling thread until the flag leaves `Waiting`.
    ///
    /// Returns immediately if the flag is already `Ready`. The first
    /// thread to park becomes the waiter the host unparks; any other
    /// thread falls back to polling.
    pub fn block_until_ready(&self) {
        let current = thread::current();
        let owner = self.waiter.get_or_init(|| current.clone()).id() == current.id();
        // Pairs with the fence in `signal_ready`: either the host sees the
        // registration, or this thread sees `Ready` below
        fence(Ordering::SeqCst);

        while self.word.load(Ordering::SeqCst) == WaitState::Waiting as u32 {
            if owner {
                thread::park();
            } else {
                thread::park_timeout(FOREIGN_WAITER_POLL);
            }
        }
    }

    /// Release the flag and wake the waiter. Never blocks.
    ///
    /// Every write the caller made before this call is visible to the
    /// waiter once it observes `Ready`. Calling it on a `Ready` flag is a
    /// no-op apart from a spurious unpark.
    pub fn signal_ready(&self) {
        self.word.store(WaitState::Ready as u32, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        if let Some(waiter) = self.waiter.get() {
            waiter.unpark();
        }
        debug!(target: "bridge::flag", "wait flag released");
    }
}

impl Default for WaitFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WaitFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WaitFlag").field(&self.state()).finish()
    }
}

/// Interrupt values stored in the interrupt word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InterruptSignal {
    NoInterrupt = 0,
    /// Keyboard interrupt (same value as POSIX SIGINT)
    SigInt = 2,
}

/// The interrupt flag register
///
/// Set by the host, cleared by the worker at the start of every run,
/// polled by the interpreter's interrupt check.
#[derive(Debug, Default)]
pub struct InterruptFlag {
    word: AtomicU32,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self {
            word: AtomicU32::new(InterruptSignal::NoInterrupt as u32),
        }
    }

    pub fn raise(&self) {
        self.word
            .store(InterruptSignal::SigInt as u32, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.word
            .store(InterruptSignal::NoInterrupt as u32, Ordering::SeqCst);
    }

    pub fn signal(&self) -> InterruptSignal {
        if self.word.load(Ordering::SeqCst) == InterruptSignal::NoInterrupt as u32 {
            InterruptSignal::NoInterrupt
        } else {
            InterruptSignal::SigInt
        }
    }

    pub fn is_raised(&self) -> bool {
        self.signal() != InterruptSignal::NoInterrupt
    }
}
