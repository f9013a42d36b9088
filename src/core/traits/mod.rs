//! Core traits shared by the bus engine and its platform glue.
//!
//! # Architecture
//!
//! ```text
//!   task context                   interrupt context
//!   Port::read / submit_*          ScbmDevice::on_interrupt
//!          \                          /
//!           v                        v
//!        CriticalState<Engine>  (SharedState<T>)
//! ```

pub mod sync;

pub use sync::{CriticalState, SharedState};
