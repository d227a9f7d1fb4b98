//! Parked channel operations.
//!
//! A blocked `send`, `receive` or `select` owns exactly one [`Signal`]. Every
//! queue entry it leaves behind (one per channel it waits on) is a [`Waiter`]
//! pointing at that signal. A partner must win [`Signal::try_claim`] before it
//! may touch the waiter's slot, so each blocked operation completes at most once.

use std::sync::Arc;
use std::time::Instant;

use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};

use crate::runtime::scheduler;

/// How a parked operation was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// A partner completed the operation registered under `case`.
    Done(usize),
    /// The channel registered under `case` was closed.
    Closed(usize),
    /// The deadline passed before any partner claimed the operation.
    TimedOut,
}

/// Result of [`Signal::claim_pair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PairClaim {
    Both,
    /// The select's own operation already has an outcome.
    OwnLost,
    /// The partner's operation already has an outcome; its entry is stale.
    PartnerLost,
}

#[derive(Debug, Default)]
struct SignalState {
    claimed: bool,
    wake: Option<Wake>,
}

/// One-shot wake-up shared by all queue entries of a blocked operation.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Try to become the single party allowed to complete this operation.
    ///
    /// Returns `false` once the operation has an outcome. A claim held by a
    /// party that has not decided yet is waited out; such holders never take a
    /// channel lock before completing or releasing.
    pub(crate) fn try_claim(&self) -> bool {
        let backoff = Backoff::new();
        loop {
            {
                let mut state = self.state.lock();
                if !state.claimed {
                    state.claimed = true;
                    return true;
                }
                if state.wake.is_some() {
                    return false;
                }
            }
            backoff.snooze();
        }
    }

    /// Claim `own` together with `partner`, in address order.
    pub(crate) fn claim_pair(
        own: &Arc<Signal>,
        partner: &Arc<Signal>,
    ) -> PairClaim {
        if Arc::as_ptr(own) < Arc::as_ptr(partner) {
            if !own.try_claim() {
                return PairClaim::OwnLost;
            }
            if !partner.try_claim() {
                own.release();
                return PairClaim::PartnerLost;
            }
        } else {
            if !partner.try_claim() {
                return PairClaim::PartnerLost;
            }
            if !own.try_claim() {
                partner.release();
                return PairClaim::OwnLost;
            }
        }
        PairClaim::Both
    }

    /// Give back a claim that was taken but never completed.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.wake.is_none());
        state.claimed = false;
        self.cond.notify_all();
    }

    /// Publish the outcome of a claimed operation and wake its owner.
    pub(crate) fn complete(&self, wake: Wake) {
        let mut state = self.state.lock();
        debug_assert!(state.claimed);
        state.wake = Some(wake);
        self.cond.notify_all();
    }

    /// Park the calling task until the operation is completed or `deadline` passes.
    ///
    /// Spins briefly before parking, and reports the park to the scheduler so a
    /// replacement worker can keep other tasks moving.
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> Wake {
        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if let Some(wake) = self.state.lock().wake {
                return wake;
            }
            backoff.snooze();
        }

        let _blocking = scheduler::enter_blocking();
        let mut state = self.state.lock();
        loop {
            if let Some(wake) = state.wake {
                return wake;
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    if !state.claimed {
                        state.claimed = true;
                        state.wake = Some(Wake::TimedOut);
                        return Wake::TimedOut;
                    }
                    // A partner holds the claim: it either completes or releases.
                    self.cond.wait(&mut state);
                }
                Some(deadline) => {
                    self.cond.wait_until(&mut state, deadline);
                }
                None => self.cond.wait(&mut state),
            }
        }
    }
}

/// A queue entry for one channel of a blocked operation.
///
/// Sender entries carry the value in `slot`; receiver entries start empty and
/// are filled by the sender that claims them.
#[derive(Debug)]
pub(crate) struct Waiter<T> {
    pub(crate) signal: Arc<Signal>,
    pub(crate) case: usize,
    pub(crate) slot: Mutex<Option<T>>,
}

impl<T> Waiter<T> {
    pub(crate) fn new(signal: Arc<Signal>, case: usize, slot: Option<T>) -> Arc<Self> {
        Arc::new(Self {
            signal,
            case,
            slot: Mutex::new(slot),
        })
    }

    /// Whether this entry belongs to the operation owning `signal`.
    #[inline]
    pub(crate) fn belongs_to(&self, signal: &Arc<Signal>) -> bool {
        Arc::ptr_eq(&self.signal, signal)
    }

    #[inline]
    pub(crate) fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    #[inline]
    pub(crate) fn put(&self, value: T) {
        *self.slot.lock() = Some(value);
    }
}
