//! Runtime system
//!
//! This module contains task scheduling and channel communication.

pub mod channel;
pub mod scheduler;
