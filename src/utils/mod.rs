//! Ambient utilities: configuration, logging and file persistence.

pub mod config;
pub mod logging;
pub mod persistence;
