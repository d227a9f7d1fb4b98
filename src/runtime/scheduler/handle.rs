//! Join handles for spawned tasks.
//!
//! A [`JoinHandle`] is the receiving end of a one-slot channel. The running
//! task owns the sending end through a [`Completion`] guard, which closes the
//! channel when the task is done with it. A task dropped before it ever ran
//! therefore leaves a closed, empty channel behind, which `join` reports as
//! [`JoinError::Cancelled`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::task::TaskId;
use crate::runtime::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Why a task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// The task panicked with the given message.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The scheduler was shut down before the task was submitted.
    #[error("scheduler is not accepting tasks")]
    Rejected,
    /// The task was dropped without running.
    #[error("task was cancelled before it ran")]
    Cancelled,
}

impl JoinError {
    #[inline]
    pub fn is_panic(&self) -> bool {
        matches!(self, JoinError::Panicked(_))
    }
}

/// Sending side of a join handle, owned by the task.
pub(crate) struct Completion<T> {
    sender: Sender<Result<T, JoinError>>,
}

impl<T> Completion<T> {
    /// Publish the task's result.
    pub(crate) fn complete(
        self,
        result: Result<T, JoinError>,
    ) {
        // The slot is only ever filled once, so this cannot be full.
        let _ = self.sender.try_send(result);
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        let _ = self.sender.close();
    }
}

/// An owned permission to wait for a spawned task's result.
///
/// Dropping the handle detaches the task; it keeps running.
pub struct JoinHandle<T> {
    id: TaskId,
    receiver: Receiver<Result<T, JoinError>>,
}

impl<T> JoinHandle<T> {
    /// A handle paired with the guard the task will complete.
    pub(crate) fn new(id: TaskId) -> (Self, Completion<T>) {
        let (sender, receiver) = channel::channel(1);
        (Self { id, receiver }, Completion { sender })
    }

    /// A handle for a task that was never accepted.
    pub(crate) fn rejected(id: TaskId) -> Self {
        let (handle, completion) = Self::new(id);
        completion.complete(Err(JoinError::Rejected));
        handle
    }

    /// The id of the task this handle refers to.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the task has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.receiver.is_closed()
    }

    /// Block until the task finishes and return its value.
    pub fn join(self) -> Result<T, JoinError> {
        self.receiver.receive().unwrap_or(Err(JoinError::Cancelled))
    }

    /// Like [`join`](JoinHandle::join), but give up after `timeout`.
    ///
    /// Returns `None` on timeout; the handle stays usable.
    pub fn join_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Result<T, JoinError>> {
        match self.receiver.receive_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Closed) => Some(Err(JoinError::Cancelled)),
        }
    }

    /// Take the result if the task already finished.
    pub fn try_join(&self) -> Option<Result<T, JoinError>> {
        match self.receiver.try_receive() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(JoinError::Cancelled)),
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
