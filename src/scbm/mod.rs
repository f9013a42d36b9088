//! Serial Control Bus Master transaction engine
//!
//! Turns read/write requests addressed to 7/10-bit slave addresses into
//! controller programming and interrupt-driven FIFO servicing.
//!
//! # Layout
//!
//! - [`Registry`]: one lazily-created [`ScbmDevice`] per hardware block
//! - [`ScbmDevice`]: hardware handle plus engine state; its
//!   [`ScbmDevice::on_interrupt`] is the interrupt entry point
//! - [`Port`]: the caller's handle, created by [`Port::init`]
//! - [`BlockingBus`]: [`crate::platform::traits::I2cInterface`] over a port
//! - [`compute_timing`]: bit-rate to timing register calculation

mod bus;
mod device;
mod engine;
mod port;
mod registry;
pub mod settings;
mod slot;
pub mod timing;

pub use bus::BlockingBus;
pub use device::ScbmDevice;
pub use port::Port;
pub use registry::{Registry, MAX_BLOCKS};
pub use settings::{Direction, Settings, Timeout, ADDR_UPPER_LIMIT};
pub use slot::{Completion, Notify};
pub use timing::{compute_timing, Filter, TimingConfig};
