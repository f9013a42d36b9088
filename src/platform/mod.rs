//! Platform abstraction layer
//!
//! This module isolates everything that touches a concrete SCB controller:
//! the register-level hardware trait, the error types reported at the port
//! boundary, and the simulated controller used by tests.

pub mod error;
pub mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export commonly used types
pub use error::{BusFault, Result, ScbmError, TransferError, WouldBlock};
pub use traits::{I2cInterface, ScbHardware};
