//! Capability-split channel ends.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::core::Chan;
use super::error::{
    CloseError, RecvTimeoutError, SendError, SendTimeoutError, TryRecvError, TrySendError,
};
use super::iter::{IntoIter, Iter, TryIter};
use super::Channel;

/// The sending end of a channel.
///
/// Only the sending side may close the channel.
pub struct Sender<T> {
    pub(super) chan: Arc<Chan<T>>,
}

impl<T> Sender<T> {
    pub(super) fn from_chan(chan: Arc<Chan<T>>) -> Self {
        Self { chan }
    }

    pub fn send(
        &self,
        value: T,
    ) -> Result<(), SendError<T>> {
        self.chan
            .send(value, None)
            .map_err(|err| SendError(err.into_inner()))
    }

    pub fn try_send(
        &self,
        value: T,
    ) -> Result<(), TrySendError<T>> {
        self.chan.try_send(value)
    }

    pub fn send_timeout(
        &self,
        value: T,
        timeout: Duration,
    ) -> Result<(), SendTimeoutError<T>> {
        self.chan.send(value, Some(Instant::now() + timeout))
    }

    /// Close the channel. Closing twice is an error.
    pub fn close(&self) -> Result<(), CloseError> {
        self.chan.close()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.chan.capacity()
    }

    pub fn len(&self) -> usize {
        self.chan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            chan: self.chan.clone(),
        }
    }
}

impl<T> From<Channel<T>> for Sender<T> {
    fn from(channel: Channel<T>) -> Self {
        Self::from_chan(channel.chan)
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The receiving end of a channel.
pub struct Receiver<T> {
    pub(super) chan: Arc<Chan<T>>,
}

impl<T> Receiver<T> {
    pub(super) fn from_chan(chan: Arc<Chan<T>>) -> Self {
        Self { chan }
    }

    /// Receive a value; `None` once the channel is closed and drained.
    pub fn receive(&self) -> Option<T> {
        self.chan.recv(None).ok()
    }

    /// Receive as a `(value, ok)` pair, with `T::default()` on closure.
    pub fn receive_with_ok(&self) -> (T, bool)
    where
        T: Default,
    {
        match self.receive() {
            Some(value) => (value, true),
            None => (T::default(), false),
        }
    }

    pub fn try_receive(&self) -> Result<T, TryRecvError> {
        self.chan.try_recv()
    }

    pub fn receive_timeout(
        &self,
        timeout: Duration,
    ) -> Result<T, RecvTimeoutError> {
        self.chan.recv(Some(Instant::now() + timeout))
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(&self.chan)
    }

    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter::new(&self.chan)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.chan.capacity()
    }

    pub fn len(&self) -> usize {
        self.chan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            chan: self.chan.clone(),
        }
    }
}

impl<T> From<Channel<T>> for Receiver<T> {
    fn from(channel: Channel<T>) -> Self {
        Self::from_chan(channel.chan)
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<'a, T> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> IntoIterator for Receiver<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter::new(self.chan)
    }
}
