//! Port configuration
//!
//! Settings are supplied once at `Port::init` and never mutated afterwards;
//! re-initialising the port is the only way to change them.

use embassy_time::{Duration, Instant};

/// Highest address representable in 10-bit addressing mode
pub const ADDR_UPPER_LIMIT: u16 = 0x3FF;

/// Per-initialization port configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    /// Target bit rate in kHz
    pub bitrate_khz: u32,
    /// Core clock feeding the block, in kHz
    pub core_clock_khz: u32,
    /// Bus propagation delay in ns
    pub bus_delay_ns: u32,
    /// Logical hardware block index
    pub block_index: usize,
    /// Treat the bus going idle mid-transaction as a fault
    ///
    /// Off by default: the interrupt has been seen to misfire when the block
    /// is reconfigured while another component shares the lines.
    pub enable_bus_inactive: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bitrate_khz: 400,        // fast mode
            core_clock_khz: 169_000, // 169 MHz
            bus_delay_ns: 0,
            block_index: 0,
            enable_bus_inactive: false,
        }
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Read,
    Write,
}

/// Deadline of a blocking call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Wait until the transaction ends
    Infinite,
    /// Give up after the given duration
    After(Duration),
}

impl Timeout {
    /// Timeout of `ms` milliseconds
    pub const fn millis(ms: u64) -> Self {
        Timeout::After(Duration::from_millis(ms))
    }

    /// Zero-length timeout, for polling
    pub const fn immediate() -> Self {
        Timeout::After(Duration::from_ticks(0))
    }

    /// Absolute deadline measured from `now`, `None` for infinite
    pub(crate) fn deadline(self, now: Instant) -> Option<Instant> {
        match self {
            Timeout::Infinite => None,
            Timeout::After(d) => Some(now.checked_add(d).unwrap_or(Instant::MAX)),
        }
    }
}
