//! Shared domain types for the Spillwatch relay.

pub mod config;
pub mod events;
pub mod frame;
pub mod status;

mod errors;

pub use errors::{Result, SpillwatchError};
