//! Channel protocol errors.
//!
//! Misusing a channel (sending after close, closing twice) is reported
//! synchronously to the caller. The returned errors are `#[must_use]`
//! through `Result`; treat them as fatal unless the caller has a recovery path.

use std::fmt;

use thiserror::Error;

/// A send on a closed channel. The rejected value is handed back.
#[derive(Clone, Copy, PartialEq, Eq, Error)]
#[error("send on closed channel")]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recover the value that could not be sent.
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

/// A second `close` on the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("close of closed channel")]
pub struct CloseError;

/// Failure of a non-blocking send.
#[derive(Clone, Copy, PartialEq, Eq, Error)]
pub enum TrySendError<T> {
    /// The buffer is full, or no receiver is waiting on an unbuffered channel.
    #[error("channel is full")]
    Full(T),
    /// The channel is closed.
    #[error("send on closed channel")]
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recover the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(value) | TrySendError::Closed(value) => value,
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        matches!(self, TrySendError::Full(_))
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, TrySendError::Closed(_))
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("Full(..)"),
            TrySendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Failure of a send with a deadline.
#[derive(Clone, Copy, PartialEq, Eq, Error)]
pub enum SendTimeoutError<T> {
    /// No room was made before the deadline.
    #[error("timed out waiting on send")]
    Timeout(T),
    /// The channel is closed, or was closed while the sender waited.
    #[error("send on closed channel")]
    Closed(T),
}

impl<T> SendTimeoutError<T> {
    /// Recover the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            SendTimeoutError::Timeout(value) | SendTimeoutError::Closed(value) => value,
        }
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SendTimeoutError::Timeout(_))
    }
}

impl<T> fmt::Debug for SendTimeoutError<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            SendTimeoutError::Timeout(_) => f.write_str("Timeout(..)"),
            SendTimeoutError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Failure of a non-blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    /// Nothing to receive right now, but the channel is open.
    #[error("receiving on an empty channel")]
    Empty,
    /// The channel is closed and drained.
    #[error("receiving on a closed channel")]
    Closed,
}

/// Failure of a receive with a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvTimeoutError {
    /// Nothing arrived before the deadline.
    #[error("timed out waiting on receive")]
    Timeout,
    /// The channel is closed and drained.
    #[error("receiving on a closed channel")]
    Closed,
}

/// Any channel protocol violation, without the payload.
///
/// Convenient at boundaries that collect errors with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("send on closed channel")]
    ClosedChannel,
    #[error("close of closed channel")]
    DoubleClose,
    #[error("channel is full")]
    Full,
    #[error("channel operation timed out")]
    Timeout,
}

impl<T> From<SendError<T>> for ChannelError {
    fn from(_: SendError<T>) -> Self {
        ChannelError::ClosedChannel
    }
}

impl From<CloseError> for ChannelError {
    fn from(_: CloseError) -> Self {
        ChannelError::DoubleClose
    }
}

impl<T> From<TrySendError<T>> for ChannelError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::ClosedChannel,
        }
    }
}

impl<T> From<SendTimeoutError<T>> for ChannelError {
    fn from(err: SendTimeoutError<T>) -> Self {
        match err {
            SendTimeoutError::Timeout(_) => ChannelError::Timeout,
            SendTimeoutError::Closed(_) => ChannelError::ClosedChannel,
        }
    }
}
