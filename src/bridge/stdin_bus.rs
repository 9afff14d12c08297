//! Stdin bus
//!
//! Fixed-capacity shared byte region carrying input lines from the host to
//! the worker:
//!
//! ```text
//! [u32 length prefix][payload: capacity bytes]
//! ```
//!
//! The host appends while the wait flag reads `Waiting`; the worker drains
//! after it wakes. The wait flag decides who may touch the region, so the
//! bytes themselves only need relaxed access. The length prefix is
//! published with release ordering after the payload.

use super::error::{BridgeError, BridgeResult};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Default payload capacity
pub const DEFAULT_STDIN_CAPACITY: usize = 400_000;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_BYTES: usize = 4;

pub struct StdinBus {
    len: AtomicU32,
    data: Box<[AtomicU8]>,
}

impl StdinBus {
    /// Allocate a bus with `capacity` payload bytes.
    ///
    /// Capacities beyond `u32::MAX` are clamped; the prefix is one word.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        Self {
            len: AtomicU32::new(0),
            data: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Payload capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Total region size, prefix included
    pub fn region_size(&self) -> usize {
        LENGTH_PREFIX_BYTES + self.capacity()
    }

    /// Current length prefix
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes still free behind the current prefix
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Append bytes after whatever is already on the bus (host side).
    ///
    /// Fails without writing anything if the flush does not fit.
    pub fn append(&self, bytes: &[u8]) -> BridgeResult<()> {
        let offset = self.len();
        let available = self.capacity() - offset;
        if bytes.len() > available {
            return Err(BridgeError::BusOverflow {
                requested: bytes.len(),
                available,
            });
        }

        for (slot, byte) in self.data[offset..].iter().zip(bytes) {
            slot.store(*byte, Ordering::Relaxed);
        }
        self.len
            .store((offset + bytes.len()) as u32, Ordering::Release);
        Ok(())
    }

    /// Copy out the payload and reset the prefix to zero (worker side)
    pub fn drain(&self) -> Vec<u8> {
        let len = self.len();
        let bytes = self.data[..len]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect();
        self.len.store(0, Ordering::Release);
        bytes
    }

    /// Drain and decode as UTF-8
    pub fn drain_text(&self) -> BridgeResult<String> {
        String::from_utf8(self.drain()).map_err(|_| BridgeError::InvalidUtf8)
    }

    /// Drop any undelivered payload
    pub fn reset(&self) {
        self.len.store(0, Ordering::Release);
    }
}

impl Default for StdinBus {
    fn default() -> Self {
        Self::new(DEFAULT_STDIN_CAPACITY)
    }
}

impl std::fmt::Debug for StdinBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdinBus")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
