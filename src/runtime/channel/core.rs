//! Shared channel state and the send / receive / close state machine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

use super::error::{CloseError, RecvTimeoutError, SendTimeoutError, TryRecvError, TrySendError};
use super::waiter::{PairClaim, Signal, Wake, Waiter};

/// Outcome of a send attempt that must not block.
pub(crate) enum SendAttempt<T> {
    Sent,
    Closed(T),
    WouldBlock(T),
}

/// Outcome of a receive attempt that must not block.
pub(crate) enum RecvAttempt<T> {
    Received(T),
    Closed,
    WouldBlock,
}

/// Result of registering one `select` case on a channel.
pub(crate) enum Registration<T> {
    /// The case completed on the spot; the select owns its signal.
    Ready,
    /// The case was queued; wait on the signal.
    Parked(Arc<Waiter<T>>),
    /// Another case already won the signal.
    Lost,
}

struct State<T> {
    buffer: VecDeque<T>,
    closed: bool,
    senders: VecDeque<Arc<Waiter<T>>>,
    receivers: VecDeque<Arc<Waiter<T>>>,
}

/// Pop the first queued waiter whose operation can still be claimed.
///
/// Entries owned by `exclude` are left in place: a select never pairs with itself.
fn claim_partner<T>(
    queue: &mut VecDeque<Arc<Waiter<T>>>,
    exclude: Option<&Arc<Signal>>,
) -> Option<Arc<Waiter<T>>> {
    let mut index = 0;
    while index < queue.len() {
        if exclude.is_some_and(|own| queue[index].belongs_to(own)) {
            index += 1;
            continue;
        }
        let waiter = queue.remove(index)?;
        if waiter.signal.try_claim() {
            return Some(waiter);
        }
        // Stale entry of an operation that already completed elsewhere or timed out.
    }
    None
}

/// The channel object shared by every handle.
pub(crate) struct Chan<T> {
    capacity: usize,
    state: Mutex<State<T>>,
}

impl<T> Chan<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                buffer: VecDeque::with_capacity(capacity),
                closed: false,
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
            }),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Send without blocking, under the channel lock.
    fn send_locked(
        &self,
        state: &mut State<T>,
        value: T,
        exclude: Option<&Arc<Signal>>,
    ) -> SendAttempt<T> {
        if state.closed {
            return SendAttempt::Closed(value);
        }
        // A parked receiver implies an empty buffer: hand the value over directly.
        if let Some(receiver) = claim_partner(&mut state.receivers, exclude) {
            receiver.put(value);
            receiver.signal.complete(Wake::Done(receiver.case));
            return SendAttempt::Sent;
        }
        if state.buffer.len() < self.capacity {
            state.buffer.push_back(value);
            return SendAttempt::Sent;
        }
        SendAttempt::WouldBlock(value)
    }

    /// Receive without blocking, under the channel lock.
    fn recv_locked(
        &self,
        state: &mut State<T>,
        exclude: Option<&Arc<Signal>>,
    ) -> RecvAttempt<T> {
        if let Some(value) = state.buffer.pop_front() {
            // The buffer was full: move the oldest parked sender's value in behind.
            if let Some(sender) = claim_partner(&mut state.senders, exclude) {
                if let Some(pending) = sender.take() {
                    state.buffer.push_back(pending);
                }
                sender.signal.complete(Wake::Done(sender.case));
            }
            return RecvAttempt::Received(value);
        }
        if let Some(sender) = claim_partner(&mut state.senders, exclude) {
            let value = sender.take();
            sender.signal.complete(Wake::Done(sender.case));
            if let Some(value) = value {
                return RecvAttempt::Received(value);
            }
        }
        if state.closed {
            RecvAttempt::Closed
        } else {
            RecvAttempt::WouldBlock
        }
    }

    pub(crate) fn try_send(
        &self,
        value: T,
    ) -> Result<(), TrySendError<T>> {
        let mut state = self.state.lock();
        match self.send_locked(&mut state, value, None) {
            SendAttempt::Sent => Ok(()),
            SendAttempt::Closed(value) => Err(TrySendError::Closed(value)),
            SendAttempt::WouldBlock(value) => Err(TrySendError::Full(value)),
        }
    }

    pub(crate) fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.state.lock();
        match self.recv_locked(&mut state, None) {
            RecvAttempt::Received(value) => Ok(value),
            RecvAttempt::Closed => Err(TryRecvError::Closed),
            RecvAttempt::WouldBlock => Err(TryRecvError::Empty),
        }
    }

    /// Blocking send. `None` waits for as long as it takes.
    pub(crate) fn send(
        &self,
        value: T,
        deadline: Option<Instant>,
    ) -> Result<(), SendTimeoutError<T>> {
        let waiter = {
            let mut state = self.state.lock();
            match self.send_locked(&mut state, value, None) {
                SendAttempt::Sent => return Ok(()),
                SendAttempt::Closed(value) => return Err(SendTimeoutError::Closed(value)),
                SendAttempt::WouldBlock(value) => {
                    if deadline.is_some_and(|deadline| deadline <= Instant::now()) {
                        return Err(SendTimeoutError::Timeout(value));
                    }
                    let waiter = Waiter::new(Signal::new(), 0, Some(value));
                    state.senders.push_back(waiter.clone());
                    waiter
                }
            }
        };

        trace!(capacity = self.capacity, "send parked");
        let wake = waiter.signal.wait(deadline);
        if wake == Wake::TimedOut {
            self.forget(&waiter.signal);
        }
        trace!(?wake, "send resumed");

        // The slot is emptied only by a receiver that took the value.
        match (waiter.take(), wake) {
            (None, _) => Ok(()),
            (Some(value), Wake::TimedOut) => Err(SendTimeoutError::Timeout(value)),
            (Some(value), _) => Err(SendTimeoutError::Closed(value)),
        }
    }

    /// Blocking receive. `None` waits for as long as it takes.
    pub(crate) fn recv(
        &self,
        deadline: Option<Instant>,
    ) -> Result<T, RecvTimeoutError> {
        let waiter = {
            let mut state = self.state.lock();
            match self.recv_locked(&mut state, None) {
                RecvAttempt::Received(value) => return Ok(value),
                RecvAttempt::Closed => return Err(RecvTimeoutError::Closed),
                RecvAttempt::WouldBlock => {
                    if deadline.is_some_and(|deadline| deadline <= Instant::now()) {
                        return Err(RecvTimeoutError::Timeout);
                    }
                    let waiter = Waiter::new(Signal::new(), 0, None);
                    state.receivers.push_back(waiter.clone());
                    waiter
                }
            }
        };

        trace!(capacity = self.capacity, "receive parked");
        let wake = waiter.signal.wait(deadline);
        if wake == Wake::TimedOut {
            self.forget(&waiter.signal);
        }
        trace!(?wake, "receive resumed");

        match (waiter.take(), wake) {
            (Some(value), _) => Ok(value),
            (None, Wake::TimedOut) => Err(RecvTimeoutError::Timeout),
            (None, _) => Err(RecvTimeoutError::Closed),
        }
    }

    /// Close the channel, waking every parked receiver and sender.
    ///
    /// Receivers observe the closure once the buffer drains; parked senders fail.
    pub(crate) fn close(&self) -> Result<(), CloseError> {
        let (receivers, senders) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(CloseError);
            }
            state.closed = true;
            (
                std::mem::take(&mut state.receivers),
                std::mem::take(&mut state.senders),
            )
        };

        trace!(
            capacity = self.capacity,
            receivers = receivers.len(),
            senders = senders.len(),
            "channel closed"
        );
        for waiter in receivers.iter().chain(senders.iter()) {
            if waiter.signal.try_claim() {
                waiter.signal.complete(Wake::Closed(waiter.case));
            }
        }
        Ok(())
    }

    /// Drop every queue entry owned by `signal`.
    pub(crate) fn forget(
        &self,
        signal: &Arc<Signal>,
    ) {
        let mut state = self.state.lock();
        state.senders.retain(|waiter| !waiter.belongs_to(signal));
        state.receivers.retain(|waiter| !waiter.belongs_to(signal));
    }

    /// Register a receive case of a select owning `signal`.
    pub(crate) fn register_recv(
        &self,
        signal: &Arc<Signal>,
        case: usize,
    ) -> (Registration<T>, Option<RecvAttempt<T>>) {
        let mut state = self.state.lock();
        if !state.buffer.is_empty() || state.closed {
            if !signal.try_claim() {
                return (Registration::Lost, None);
            }
            signal.complete(Wake::Done(case));
            let attempt = self.recv_locked(&mut state, Some(signal));
            return (Registration::Ready, Some(attempt));
        }

        let mut index = 0;
        while index < state.senders.len() {
            let candidate = state.senders[index].clone();
            if candidate.belongs_to(signal) {
                index += 1;
                continue;
            }
            match Signal::claim_pair(signal, &candidate.signal) {
                PairClaim::OwnLost => return (Registration::Lost, None),
                PairClaim::PartnerLost => {
                    state.senders.remove(index);
                }
                PairClaim::Both => {
                    state.senders.remove(index);
                    signal.complete(Wake::Done(case));
                    let value = candidate.take();
                    candidate.signal.complete(Wake::Done(candidate.case));
                    let attempt = match value {
                        Some(value) => RecvAttempt::Received(value),
                        None => RecvAttempt::Closed,
                    };
                    return (Registration::Ready, Some(attempt));
                }
            }
        }

        let waiter = Waiter::new(signal.clone(), case, None);
        state.receivers.push_back(waiter.clone());
        (Registration::Parked(waiter), None)
    }

    /// Register a send case of a select owning `signal`.
    ///
    /// A `Lost` registration hands the value back as `SendAttempt::WouldBlock`.
    pub(crate) fn register_send(
        &self,
        signal: &Arc<Signal>,
        case: usize,
        value: T,
    ) -> (Registration<T>, Option<SendAttempt<T>>) {
        let mut state = self.state.lock();

        let mut index = 0;
        while !state.closed && index < state.receivers.len() {
            let candidate = state.receivers[index].clone();
            if candidate.belongs_to(signal) {
                index += 1;
                continue;
            }
            match Signal::claim_pair(signal, &candidate.signal) {
                PairClaim::OwnLost => {
                    return (Registration::Lost, Some(SendAttempt::WouldBlock(value)));
                }
                PairClaim::PartnerLost => {
                    state.receivers.remove(index);
                }
                PairClaim::Both => {
                    state.receivers.remove(index);
                    signal.complete(Wake::Done(case));
                    candidate.put(value);
                    candidate.signal.complete(Wake::Done(candidate.case));
                    return (Registration::Ready, Some(SendAttempt::Sent));
                }
            }
        }

        if state.closed || state.buffer.len() < self.capacity {
            if !signal.try_claim() {
                return (Registration::Lost, Some(SendAttempt::WouldBlock(value)));
            }
            signal.complete(Wake::Done(case));
            let attempt = self.send_locked(&mut state, value, Some(signal));
            return (Registration::Ready, Some(attempt));
        }

        let waiter = Waiter::new(signal.clone(), case, Some(value));
        state.senders.push_back(waiter.clone());
        (Registration::Parked(waiter), None)
    }
}
