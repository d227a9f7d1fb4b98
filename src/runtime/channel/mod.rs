//! Typed channels for passing values between tasks.
//!
//! A channel has a fixed capacity chosen at construction:
//!
//! - `0` makes it unbuffered: a send waits until a receiver takes the value
//!   directly (rendezvous), and a receive waits for a sender.
//! - `n > 0` makes it buffered: up to `n` values are queued in FIFO order and
//!   senders only wait while the buffer is full.
//!
//! A channel is closed at most once. After `close`, sends fail with
//! [`SendError`], parked senders are woken with the same error, and receivers
//! drain what is left in the buffer before every further receive reports the
//! closure immediately. Dropping handles never closes a channel.
//!
//! [`Channel`] is the full-capability handle. [`channel`] splits one into a
//! [`Sender`] and a [`Receiver`] so that only the producing side can close it.
//!
//! # Example
//!
//! ```
//! use conduit::{channel, spawn};
//!
//! let (tx, rx) = channel(0);
//! spawn(move || {
//!     for i in 0..3 {
//!         tx.send(i).unwrap();
//!     }
//!     tx.close().unwrap();
//! });
//! assert_eq!(rx.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
//! ```

mod core;
pub mod error;
mod handle;
mod iter;
pub mod select;
mod waiter;

pub use error::{
    ChannelError, CloseError, RecvTimeoutError, SendError, SendTimeoutError, TryRecvError,
    TrySendError,
};
pub use handle::{Receiver, Sender};
pub use iter::{IntoIter, Iter, TryIter};
pub use select::Select;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use self::core::Chan;

/// Create a channel of the given capacity and split it into its two ends.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    Channel::new(capacity).split()
}

/// A bidirectional channel handle.
///
/// Cloning a `Channel` produces another handle to the same channel.
pub struct Channel<T> {
    chan: Arc<Chan<T>>,
}

impl<T> Channel<T> {
    /// Create an empty channel. A capacity of `0` makes it unbuffered.
    pub fn new(capacity: usize) -> Self {
        Self {
            chan: Arc::new(Chan::new(capacity)),
        }
    }

    /// Create an unbuffered (rendezvous) channel.
    #[inline]
    pub fn unbuffered() -> Self {
        Self::new(0)
    }

    /// The fixed buffer capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.chan.capacity()
    }

    /// Number of values currently buffered.
    pub fn len(&self) -> usize {
        self.chan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    /// Send a value, waiting for a receiver or for buffer space.
    ///
    /// Fails if the channel is closed, including when it is closed while this
    /// call is waiting.
    pub fn send(
        &self,
        value: T,
    ) -> Result<(), SendError<T>> {
        self.chan
            .send(value, None)
            .map_err(|err| SendError(err.into_inner()))
    }

    /// Send only if it can be done without waiting.
    pub fn try_send(
        &self,
        value: T,
    ) -> Result<(), TrySendError<T>> {
        self.chan.try_send(value)
    }

    /// Send, giving up after `timeout`.
    pub fn send_timeout(
        &self,
        value: T,
        timeout: Duration,
    ) -> Result<(), SendTimeoutError<T>> {
        self.chan.send(value, Some(Instant::now() + timeout))
    }

    /// Receive a value, waiting while the channel is empty and open.
    ///
    /// Returns `None` once the channel is closed and drained, immediately and
    /// on every later call.
    pub fn receive(&self) -> Option<T> {
        self.chan.recv(None).ok()
    }

    /// Receive as a `(value, ok)` pair.
    ///
    /// `ok` is `false` when the channel is closed and drained, in which case
    /// `value` is `T::default()`.
    pub fn receive_with_ok(&self) -> (T, bool)
    where
        T: Default,
    {
        match self.receive() {
            Some(value) => (value, true),
            None => (T::default(), false),
        }
    }

    /// Receive only if a value is available without waiting.
    pub fn try_receive(&self) -> Result<T, TryRecvError> {
        self.chan.try_recv()
    }

    /// Receive, giving up after `timeout`.
    pub fn receive_timeout(
        &self,
        timeout: Duration,
    ) -> Result<T, RecvTimeoutError> {
        self.chan.recv(Some(Instant::now() + timeout))
    }

    /// Close the channel. Closing twice is an error.
    pub fn close(&self) -> Result<(), CloseError> {
        self.chan.close()
    }

    /// Iterate over received values until the channel is closed and drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(&self.chan)
    }

    /// Iterate over the values that are available right now.
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter::new(&self.chan)
    }

    /// A send-only handle to this channel.
    pub fn sender(&self) -> Sender<T> {
        Sender::from_chan(self.chan.clone())
    }

    /// A receive-only handle to this channel.
    pub fn receiver(&self) -> Receiver<T> {
        Receiver::from_chan(self.chan.clone())
    }

    /// Split into a send-only and a receive-only handle.
    pub fn split(self) -> (Sender<T>, Receiver<T>) {
        (
            Sender::from_chan(self.chan.clone()),
            Receiver::from_chan(self.chan),
        )
    }

    /// Whether both handles refer to the same channel.
    pub fn same_channel(
        &self,
        other: &Channel<T>,
    ) -> bool {
        Arc::ptr_eq(&self.chan, &other.chan)
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            chan: self.chan.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<'a, T> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> IntoIterator for Channel<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter::new(self.chan)
    }
}
