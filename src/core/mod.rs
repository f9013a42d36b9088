//! Core infrastructure
//!
//! Logging macros and the synchronization primitives the bus engine is built on.

pub mod logging;
pub mod traits;
