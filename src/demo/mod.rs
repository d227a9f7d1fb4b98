//! Classic channel programs, run on a [`Scheduler`].
//!
//! Each program returns what it observed so the binary can print it and tests
//! can check it.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::runtime::channel::{channel, Channel, ChannelError, Select};
use crate::runtime::scheduler::{Scheduler, TaskBuilder};

/// Sum each half of `numbers` in its own task and collect both partial sums
/// through one unbuffered channel, in arrival order.
pub fn sum(
    scheduler: &Scheduler,
    numbers: &[i32],
) -> Result<(i32, i32)> {
    let (tx, rx) = channel::<i32>(0);
    let (left, right) = numbers.split_at(numbers.len() / 2);

    for (name, half) in [("sum-left", left), ("sum-right", right)] {
        let tx = tx.clone();
        let half = half.to_vec();
        scheduler.spawn_with(TaskBuilder::new().name(name), move || {
            tx.send(half.iter().sum())
        });
    }

    let x = rx.receive().ok_or(ChannelError::ClosedChannel)?;
    let y = rx.receive().ok_or(ChannelError::ClosedChannel)?;
    Ok((x, y))
}

/// Produce the first `n` Fibonacci numbers into a buffered channel, close it,
/// and collect them by iterating until the channel reports closed.
pub fn fibonacci(
    scheduler: &Scheduler,
    n: usize,
) -> Result<Vec<u64>> {
    let (tx, rx) = channel::<u64>(n.max(1));

    let producer = scheduler.spawn(move || -> Result<(), ChannelError> {
        let (mut x, mut y) = (0u64, 1u64);
        for _ in 0..n {
            tx.send(x)?;
            (x, y) = (y, x.saturating_add(y));
        }
        tx.close()?;
        Ok(())
    });

    let values: Vec<u64> = rx.iter().collect();
    producer.join()??;
    Ok(values)
}

/// Fibonacci driven by `select`: the caller offers values on an unbuffered
/// channel until a consumer task, having read `n` of them, signals quit.
pub fn select_fibonacci(
    scheduler: &Scheduler,
    n: usize,
) -> Result<Vec<u64>> {
    let (c_tx, c_rx) = channel::<u64>(0);
    let (quit_tx, quit_rx) = channel::<()>(0);

    let consumer = scheduler.spawn(move || -> Result<Vec<u64>, ChannelError> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            match c_rx.receive() {
                Some(value) => values.push(value),
                None => break,
            }
        }
        quit_tx.send(())?;
        Ok(values)
    });

    let (mut x, mut y) = (0u64, 1u64);
    loop {
        let sent = Select::new()
            .send(&c_tx, x, |sent| sent.map(|()| true))
            .recv(&quit_rx, |_| Ok(false))
            .wait()?;
        if !sent {
            debug!("quit received");
            break;
        }
        (x, y) = (y, x.saturating_add(y));
    }

    Ok(consumer.join()??)
}

/// What the ticker loop observed on one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerEvent {
    Tick,
    Boom,
    /// Nothing was ready; the default case ran.
    Idle,
}

/// A ticker and a one-shot timer multiplexed with a default case.
///
/// Returns the sequence of events up to and including `Boom`.
pub fn ticker(
    scheduler: &Scheduler,
    tick: Duration,
    boom: Duration,
) -> Result<Vec<TickerEvent>> {
    let ticks = Channel::<()>::new(0);
    let tick_tx = ticks.sender();
    scheduler.spawn_with(TaskBuilder::new().name("ticker"), move || loop {
        thread::sleep(tick);
        // Fails once the loop below closes the channel.
        if tick_tx.send(()).is_err() {
            break;
        }
    });

    let (boom_tx, boom_rx) = channel::<()>(1);
    scheduler.spawn_with(TaskBuilder::new().name("timer"), move || {
        thread::sleep(boom);
        boom_tx.send(())
    });

    let tick_rx = ticks.receiver();
    let mut events = Vec::new();
    loop {
        let event = Select::new()
            .recv(&tick_rx, |_| TickerEvent::Tick)
            .recv(&boom_rx, |_| TickerEvent::Boom)
            .default(|| TickerEvent::Idle)
            .wait();
        events.push(event);
        match event {
            TickerEvent::Boom => break,
            TickerEvent::Idle => thread::sleep(tick / 2),
            TickerEvent::Tick => {}
        }
    }

    ticks.close()?;
    Ok(events)
}

/// Fill a channel of capacity 2, overflow it from a task, and drain it.
///
/// The third send blocks until the first receive makes room.
pub fn buffered(scheduler: &Scheduler) -> Result<Vec<i32>> {
    let ch = Channel::<i32>::new(2);
    ch.send(1)?;
    ch.send(2)?;

    let overflow = ch.sender();
    let third = scheduler.spawn(move || overflow.send(3));

    let mut received = Vec::with_capacity(3);
    for _ in 0..3 {
        received.push(ch.receive().ok_or(ChannelError::ClosedChannel)?);
    }
    third.join()??;
    Ok(received)
}

/// An accumulator owned by exactly one task at a time.
#[derive(Debug, Default)]
pub struct Adder {
    total: i64,
}

impl Adder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `x` and return the new total.
    pub fn add(
        &mut self,
        x: i64,
    ) -> i64 {
        self.total += x;
        self.total
    }

    pub fn total(&self) -> i64 {
        self.total
    }
}

/// Move an [`Adder`] into a task, feed it `values` and collect its running totals.
pub fn running_sums(
    scheduler: &Scheduler,
    values: &[i64],
) -> Result<(Vec<i64>, i64)> {
    let (in_tx, in_rx) = channel::<i64>(values.len().max(1));
    let (out_tx, out_rx) = channel::<i64>(0);

    let mut adder = Adder::new();
    let worker = scheduler.spawn(move || -> Result<i64, ChannelError> {
        for x in in_rx {
            out_tx.send(adder.add(x))?;
        }
        out_tx.close()?;
        Ok(adder.total())
    });

    for &value in values {
        in_tx.send(value)?;
    }
    in_tx.close()?;

    let sums: Vec<i64> = out_rx.iter().collect();
    let total = worker.join()??;
    Ok((sums, total))
}
