//! Utility modules: logging and configuration

pub mod config;
pub mod logger;
