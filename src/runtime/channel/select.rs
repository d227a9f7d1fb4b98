//! Waiting on several channel operations at once.
//!
//! A [`Select`] collects receive and send cases, each with a handler. Exactly
//! one case fires per `wait`:
//!
//! 1. every case is polled without blocking, in random order, so that among
//!    several ready cases each is equally likely to win;
//! 2. if none is ready and a default case was given, the default runs;
//! 3. otherwise the select parks one waiter on every channel and sleeps until
//!    a partner or a `close` completes one of them.
//!
//! A closed channel makes its receive case ready with `None` and its send case
//! ready with `Err(SendError)`. A select without cases and without a default
//! never returns from [`Select::wait`].
//!
//! ```
//! use conduit::{channel, Select};
//!
//! let (tx, rx) = channel::<i32>(1);
//! let (_quit_tx, quit_rx) = channel::<()>(0);
//! tx.send(7).unwrap();
//!
//! let got = Select::new()
//!     .recv(&rx, |value| value)
//!     .recv(&quit_rx, |_| None)
//!     .wait();
//! assert_eq!(got, Some(7));
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use smallvec::SmallVec;
use tracing::trace;

use super::core::{Chan, RecvAttempt, Registration, SendAttempt};
use super::error::{SendError, TryRecvError, TrySendError};
use super::handle::{Receiver, Sender};
use super::waiter::{Signal, Wake, Waiter};
use crate::runtime::scheduler;

/// Result of registering a case on its channel.
enum Step<'a, R> {
    Fired(R),
    Parked(Box<dyn ParkedCase<R> + 'a>),
    Lost,
}

/// A case that has not been registered yet.
trait Case<'a, R> {
    /// Complete the case if that can be done without waiting.
    fn poll(self: Box<Self>) -> Result<R, Box<dyn Case<'a, R> + 'a>>;

    fn register(
        self: Box<Self>,
        signal: &Arc<Signal>,
        index: usize,
    ) -> Step<'a, R>;
}

/// A case with a waiter queued on its channel.
trait ParkedCase<R> {
    fn forget(
        &self,
        signal: &Arc<Signal>,
    );

    /// Run the handler of the case that fired.
    fn finish(self: Box<Self>) -> R;
}

struct RecvCase<'a, T, F> {
    chan: &'a Arc<Chan<T>>,
    handler: F,
}

impl<'a, T, F, R> Case<'a, R> for RecvCase<'a, T, F>
where
    T: 'a,
    F: FnOnce(Option<T>) -> R + 'a,
    R: 'a,
{
    fn poll(self: Box<Self>) -> Result<R, Box<dyn Case<'a, R> + 'a>> {
        match self.chan.try_recv() {
            Ok(value) => Ok((self.handler)(Some(value))),
            Err(TryRecvError::Closed) => Ok((self.handler)(None)),
            Err(TryRecvError::Empty) => Err(self),
        }
    }

    fn register(
        self: Box<Self>,
        signal: &Arc<Signal>,
        index: usize,
    ) -> Step<'a, R> {
        let RecvCase { chan, handler } = *self;
        match chan.register_recv(signal, index) {
            (Registration::Ready, Some(RecvAttempt::Received(value))) => {
                Step::Fired(handler(Some(value)))
            }
            (Registration::Ready, _) => Step::Fired(handler(None)),
            (Registration::Parked(waiter), _) => Step::Parked(Box::new(ParkedRecv {
                chan,
                waiter,
                handler,
            })),
            (Registration::Lost, _) => Step::Lost,
        }
    }
}

struct ParkedRecv<'a, T, F> {
    chan: &'a Arc<Chan<T>>,
    waiter: Arc<Waiter<T>>,
    handler: F,
}

impl<T, F, R> ParkedCase<R> for ParkedRecv<'_, T, F>
where
    F: FnOnce(Option<T>) -> R,
{
    fn forget(
        &self,
        signal: &Arc<Signal>,
    ) {
        self.chan.forget(signal);
    }

    fn finish(self: Box<Self>) -> R {
        // Filled by the sender that claimed us; empty if the channel closed.
        (self.handler)(self.waiter.take())
    }
}

struct SendCase<'a, T, F> {
    chan: &'a Arc<Chan<T>>,
    value: T,
    handler: F,
}

impl<'a, T, F, R> Case<'a, R> for SendCase<'a, T, F>
where
    T: 'a,
    F: FnOnce(Result<(), SendError<T>>) -> R + 'a,
    R: 'a,
{
    fn poll(self: Box<Self>) -> Result<R, Box<dyn Case<'a, R> + 'a>> {
        let SendCase {
            chan,
            value,
            handler,
        } = *self;
        match chan.try_send(value) {
            Ok(()) => Ok(handler(Ok(()))),
            Err(TrySendError::Closed(value)) => Ok(handler(Err(SendError(value)))),
            Err(TrySendError::Full(value)) => Err(Box::new(SendCase {
                chan,
                value,
                handler,
            })),
        }
    }

    fn register(
        self: Box<Self>,
        signal: &Arc<Signal>,
        index: usize,
    ) -> Step<'a, R> {
        let SendCase {
            chan,
            value,
            handler,
        } = *self;
        match chan.register_send(signal, index, value) {
            (Registration::Ready, Some(SendAttempt::Sent)) => Step::Fired(handler(Ok(()))),
            (
                Registration::Ready,
                Some(SendAttempt::Closed(value) | SendAttempt::WouldBlock(value)),
            ) => Step::Fired(handler(Err(SendError(value)))),
            (Registration::Ready, None) => Step::Fired(handler(Ok(()))),
            (Registration::Parked(waiter), _) => Step::Parked(Box::new(ParkedSend {
                chan,
                waiter,
                handler,
            })),
            (Registration::Lost, _) => Step::Lost,
        }
    }
}

struct ParkedSend<'a, T, F> {
    chan: &'a Arc<Chan<T>>,
    waiter: Arc<Waiter<T>>,
    handler: F,
}

impl<T, F, R> ParkedCase<R> for ParkedSend<'_, T, F>
where
    F: FnOnce(Result<(), SendError<T>>) -> R,
{
    fn forget(
        &self,
        signal: &Arc<Signal>,
    ) {
        self.chan.forget(signal);
    }

    fn finish(self: Box<Self>) -> R {
        // A receiver empties the slot; a close leaves the value behind.
        match self.waiter.take() {
            None => (self.handler)(Ok(())),
            Some(value) => (self.handler)(Err(SendError(value))),
        }
    }
}

/// A set of channel operations of which exactly one will fire.
///
/// All handlers return the same type `R`, which becomes the result of
/// [`wait`](Select::wait).
pub struct Select<'a, R> {
    cases: SmallVec<[Box<dyn Case<'a, R> + 'a>; 4]>,
    default: Option<Box<dyn FnOnce() -> R + 'a>>,
}

impl<'a, R: 'a> Select<'a, R> {
    pub fn new() -> Self {
        Self {
            cases: SmallVec::new(),
            default: None,
        }
    }

    /// Add a receive case. The handler gets `None` if the channel is closed
    /// and drained.
    pub fn recv<T: 'a>(
        mut self,
        receiver: &'a Receiver<T>,
        handler: impl FnOnce(Option<T>) -> R + 'a,
    ) -> Self {
        self.cases.push(Box::new(RecvCase {
            chan: &receiver.chan,
            handler,
        }));
        self
    }

    /// Add a send case. If another case fires, `value` is dropped unsent.
    pub fn send<T: 'a>(
        mut self,
        sender: &'a Sender<T>,
        value: T,
        handler: impl FnOnce(Result<(), SendError<T>>) -> R + 'a,
    ) -> Self {
        self.cases.push(Box::new(SendCase {
            chan: &sender.chan,
            value,
            handler,
        }));
        self
    }

    /// Run `handler` instead of waiting when no case is ready.
    pub fn default(
        mut self,
        handler: impl FnOnce() -> R + 'a,
    ) -> Self {
        self.default = Some(Box::new(handler));
        self
    }

    /// Number of channel cases, not counting the default.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Block until one case fires and return its handler's result.
    pub fn wait(self) -> R {
        // Without a deadline `run` only returns once a case fired.
        self.run(None).unwrap_or_else(|| park_forever())
    }

    /// Like [`wait`](Select::wait), but give up after `timeout`.
    ///
    /// Returns `None` if no case fired in time. The default case, if any,
    /// still takes precedence over waiting.
    pub fn wait_timeout(
        self,
        timeout: Duration,
    ) -> Option<R> {
        self.run(Some(Instant::now() + timeout))
    }

    fn run(
        self,
        deadline: Option<Instant>,
    ) -> Option<R> {
        let Select { mut cases, default } = self;
        cases.shuffle(&mut rand::rng());

        let mut pending: SmallVec<[Box<dyn Case<'a, R> + 'a>; 4]> = SmallVec::new();
        for case in cases {
            match case.poll() {
                Ok(result) => return Some(result),
                Err(case) => pending.push(case),
            }
        }

        if let Some(default) = default {
            return Some(default());
        }

        if pending.is_empty() {
            return block_forever(deadline);
        }

        let signal = Signal::new();
        let mut parked: SmallVec<[Option<Box<dyn ParkedCase<R> + 'a>>; 4]> = SmallVec::new();
        for (index, case) in pending.into_iter().enumerate() {
            match case.register(&signal, index) {
                Step::Fired(result) => {
                    forget_all(&parked, &signal);
                    return Some(result);
                }
                Step::Parked(case) => parked.push(Some(case)),
                // A queued case already fired: stop registering and collect it.
                Step::Lost => break,
            }
        }

        trace!(cases = parked.len(), "select parked");
        let wake = signal.wait(deadline);
        forget_all(&parked, &signal);
        trace!(?wake, "select resumed");

        match wake {
            Wake::Done(index) | Wake::Closed(index) => parked
                .get_mut(index)
                .and_then(Option::take)
                .map(|case| case.finish()),
            Wake::TimedOut => None,
        }
    }
}

impl<'a, R: 'a> Default for Select<'a, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for Select<'_, R> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Select")
            .field("cases", &self.cases.len())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

fn forget_all<R>(
    parked: &[Option<Box<dyn ParkedCase<R> + '_>>],
    signal: &Arc<Signal>,
) {
    for case in parked.iter().flatten() {
        case.forget(signal);
    }
}

/// A select with nothing to wait on.
fn block_forever<R>(deadline: Option<Instant>) -> Option<R> {
    match deadline {
        Some(deadline) => {
            let _blocking = scheduler::enter_blocking();
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
            None
        }
        None => park_forever(),
    }
}

fn park_forever() -> ! {
    let _blocking = scheduler::enter_blocking();
    loop {
        thread::park();
    }
}
