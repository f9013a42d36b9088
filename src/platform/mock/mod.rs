//! Mock platform implementation for testing
//!
//! This module provides a simulated SCB controller and helpers that move its
//! bus and deliver its interrupts, so the engine can be exercised without
//! hardware.
//!
//! # Feature Gate
//!
//! This module is available in two contexts:
//! - During test builds (`#[cfg(test)]`)
//! - When the `mock` feature is enabled
//!
//! # Example
//!
//! ```ignore
//! use scb_master::platform::mock::{drive, MockScb};
//! use scb_master::scbm::{Port, Registry, Settings, Timeout};
//!
//! let registry = Registry::<MockScb>::new(|_| MockScb::new());
//! let port = Port::init(&registry, Settings::default())?;
//! port.device().hardware().attach(0x4C);
//! let n = drive(port.device(), port.write(0x4C, &[0x00, 0x01], Timeout::Infinite)).await?;
//! ```

#![cfg(any(test, feature = "mock"))]

mod scb;

pub use scb::{BusTransaction, MockScb, FIFO_DEPTH};

use core::convert::Infallible;
use core::future::Future;

use embassy_futures::select::{select, Either};
use embassy_futures::yield_now;

use crate::scbm::ScbmDevice;

/// Interrupt deliveries allowed per bus step before giving up on a condition
/// the engine does not clear
const MAX_IRQ_PASSES: usize = 16;

/// Bus steps `run_until_idle` takes before giving up
const MAX_STEPS: usize = 1_000_000;

/// Clock one bus event and deliver any resulting interrupts
///
/// Returns whether anything happened.
pub fn pump<const SLOTS: usize>(device: &ScbmDevice<MockScb, SLOTS>) -> bool {
    let moved = device.hardware().step();
    let mut serviced = false;
    for _ in 0..MAX_IRQ_PASSES {
        if !device.hardware().irq_pending() {
            break;
        }
        device.on_interrupt();
        serviced = true;
    }
    moved || serviced
}

/// Run the bus until nothing moves; returns whether the engine is idle
pub fn run_until_idle<const SLOTS: usize>(device: &ScbmDevice<MockScb, SLOTS>) -> bool {
    for _ in 0..MAX_STEPS {
        if !pump(device) {
            break;
        }
    }
    device.is_idle()
}

/// Keep the bus moving forever, yielding between steps
pub async fn drive_bus<const SLOTS: usize>(device: &ScbmDevice<MockScb, SLOTS>) -> Infallible {
    loop {
        pump(device);
        yield_now().await;
    }
}

/// Await `fut` while the bus runs alongside it
pub async fn drive<F: Future, const SLOTS: usize>(
    device: &ScbmDevice<MockScb, SLOTS>,
    fut: F,
) -> F::Output {
    match select(fut, drive_bus(device)).await {
        Either::First(output) => output,
        Either::Second(never) => match never {},
    }
}
