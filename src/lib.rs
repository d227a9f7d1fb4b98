//! Conduit: lightweight tasks and typed channels
//!
//! Spawn closures onto a work-stealing thread pool and let them talk through
//! typed channels: unbuffered (rendezvous) or buffered, closed once,
//! iterated until closed, and multiplexed with [`Select`].
//!
//! # Example
//!
//! ```
//! use conduit::{channel, spawn};
//!
//! let numbers = [7, 2, 8, -9, 4, 0];
//! let (tx, rx) = channel(0);
//! for half in numbers.chunks(3) {
//!     let tx = tx.clone();
//!     let half = half.to_vec();
//!     spawn(move || tx.send(half.iter().sum::<i32>()));
//! }
//! let (x, y) = (rx.receive().unwrap(), rx.receive().unwrap());
//! assert_eq!(x + y, 12);
//! ```

#![doc(html_root_url = "https://docs.rs/conduit")]
#![warn(rust_2018_idioms)]

pub mod demo;
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

pub use runtime::channel::{
    self, channel, Channel, ChannelError, CloseError, Receiver, RecvTimeoutError, Select,
    SendError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
pub use runtime::scheduler::{
    current_task, spawn, yield_now, JoinError, JoinHandle, Scheduler, SchedulerConfig,
    SchedulerError, TaskBuilder, TaskId,
};
pub use util::config::{ConfigError, RuntimeConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = "conduit";
