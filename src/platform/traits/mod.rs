//! Platform abstraction traits
//!
//! This module defines the traits that platform implementations must provide.

pub mod i2c;
pub mod scb;

// Re-export trait interfaces
pub use i2c::I2cInterface;
pub use scb::{FillFlags, IrqFlags, ScbHardware};
