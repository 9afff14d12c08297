//! Cross-context message channel
//!
//! Queued, one-directional, FIFO. Posting never blocks. The host drains
//! with `try_recv` from its event loop; the worker may park in `recv`
//! between runs. A mutex-wrapped VecDeque, but the mutex is only ever
//! taken with `try_lock`: critical sections are a push or a pop, so a
//! contended caller spins briefly instead of parking. A parked receiver
//! is woken with `Thread::unpark`.
//!
//! Dropping the receiver, or the last sender, closes the channel.

use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, Thread};

/// Create a new channel pair
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(ChannelInner {
            queue: VecDeque::new(),
            closed: false,
            senders: 1,
            parked: None,
        }),
    });

    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

struct ChannelInner<T> {
    queue: VecDeque<T>,
    closed: bool,
    senders: usize,
    /// Receiver parked in `recv`
    parked: Option<Thread>,
}

struct Shared<T> {
    inner: Mutex<ChannelInner<T>>,
}

impl<T> Shared<T> {
    /// Take the lock without ever parking the calling thread
    fn lock(&self) -> MutexGuard<'_, ChannelInner<T>> {
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            std::hint::spin_loop();
        }
    }

    fn close(&self) {
        let parked = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.parked.take()
        };
        if let Some(receiver) = parked {
            receiver.unpark();
        }
    }
}

/// Posting half of a channel
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Post a value. Fire-and-forget unless the channel is closed.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let parked = {
            let mut inner = self.shared.lock();
            if inner.closed {
                return Err(SendError(value));
            }
            inner.queue.push_back(value);
            inner.parked.take()
        };
        if let Some(receiver) = parked {
            receiver.unpark();
        }
        Ok(())
    }

    /// Close the channel; queued values stay receivable
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let last = {
            let mut inner = self.shared.lock();
            inner.senders -= 1;
            inner.senders == 0
        };
        if last {
            self.shared.close();
        }
    }
}

/// Receiving half of a channel
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Receive a value without blocking
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut inner = self.shared.lock();
        match inner.queue.pop_front() {
            Some(value) => Ok(value),
            None if inner.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Receive a value, parking until one arrives.
    ///
    /// Returns `None` once the channel is closed and drained. Only the
    /// worker calls this; the host must stick to `try_recv`.
    pub fn recv(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.shared.lock();
                if let Some(value) = inner.queue.pop_front() {
                    return Some(value);
                }
                if inner.closed {
                    return None;
                }
                inner.parked = Some(thread::current());
            }
            // A send between the unlock and here leaves an unpark token,
            // so this returns at once
            thread::park();
        }
    }

    /// Close from the receiving side so posters see the channel is gone
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Error when sending fails
#[derive(Debug)]
pub struct SendError<T>(pub T);

/// Error when try_recv fails
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_send_receive() {
        let (tx, rx) = channel::<i32>();

        tx.send(42).unwrap();
        tx.send(43).unwrap();

        assert_eq!(rx.try_recv(), Ok(42));
        assert_eq!(rx.try_recv(), Ok(43));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_closed_channel() {
        let (tx, rx) = channel::<i32>();

        tx.send(1).unwrap();
        tx.close();

        // Values sent before close are still delivered
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_send_after_close_fails() {
        let (tx, rx) = channel::<i32>();

        rx.close();
        let result = tx.send(42);

        assert!(tx.is_closed());
        assert_eq!(result.unwrap_err().0, 42);
    }

    #[test]
    fn test_dropped_receiver_closes_channel() {
        let (tx, rx) = channel::<i32>();
        drop(rx);
        assert!(tx.send(1).is_err());
    }

    #[test]
    fn test_last_sender_drop_closes_channel() {
        let (tx, rx) = channel::<i32>();
        let tx2 = tx.clone();

        drop(tx);
        tx2.send(7).unwrap();
        drop(tx2);

        assert_eq!(rx.try_recv(), Ok(7));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_fifo_order_across_threads() {
        let (tx, rx) = channel::<i32>();

        let producer = thread::spawn(move || {
            for i in 0..100 {
                tx.send(i).unwrap();
            }
            tx.close();
        });

        let mut received = Vec::new();
        while let Some(value) = rx.recv() {
            received.push(value);
        }
        producer.join().unwrap();

        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_recv_wakes_on_close() {
        let (tx, rx) = channel::<i32>();

        let waiter = thread::spawn(move || rx.recv());
        tx.close();

        assert_eq!(waiter.join().unwrap(), None);
    }
}
