//! Iterators that receive from a channel.

use std::iter::FusedIterator;
use std::sync::Arc;

use super::core::Chan;

/// Blocking iterator over received values, borrowed from a handle.
///
/// Ends once the channel is closed and drained.
pub struct Iter<'a, T> {
    chan: &'a Chan<T>,
    done: bool,
}

impl<'a, T> Iter<'a, T> {
    pub(super) fn new(chan: &'a Arc<Chan<T>>) -> Self {
        Self {
            chan: chan.as_ref(),
            done: false,
        }
    }
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        let next = self.chan.recv(None).ok();
        self.done = next.is_none();
        next
    }
}

impl<T> FusedIterator for Iter<'_, T> {}

/// Owning blocking iterator over received values.
pub struct IntoIter<T> {
    chan: Arc<Chan<T>>,
    done: bool,
}

impl<T> IntoIter<T> {
    pub(super) fn new(chan: Arc<Chan<T>>) -> Self {
        Self { chan, done: false }
    }
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        let next = self.chan.recv(None).ok();
        self.done = next.is_none();
        next
    }
}

impl<T> FusedIterator for IntoIter<T> {}

/// Non-blocking iterator: yields what is available now and stops.
pub struct TryIter<'a, T> {
    chan: &'a Chan<T>,
}

impl<'a, T> TryIter<'a, T> {
    pub(super) fn new(chan: &'a Arc<Chan<T>>) -> Self {
        Self {
            chan: chan.as_ref(),
        }
    }
}

impl<T> Iterator for TryIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.chan.try_recv().ok()
    }
}
