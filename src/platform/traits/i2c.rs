//! Two-wire bus interface trait
//!
//! This module defines the blocking transaction interface that device codecs
//! (tuners, demodulators) are written against. The SCBM port provides it
//! through [`crate::scbm::BlockingBus`].

use crate::platform::Result;

/// Two-wire bus interface trait
///
/// Every method completes a whole transaction (start, address, data, stop)
/// before returning.
///
/// # Invariants
///
/// - Addresses are 7-bit or 10-bit (valid range: 0x000..=0x3FF)
/// - Only one transaction per bus is in flight from a given caller
#[allow(async_fn_in_trait)]
pub trait I2cInterface {
    /// Write data to a device
    ///
    /// START - ADDR(W) - DATA - STOP
    ///
    /// An empty `data` only checks that the address is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `ScbmError::Bus` if the device does not acknowledge or the bus
    /// faults, `ScbmError::Timeout` if the transaction does not finish in
    /// time.
    async fn write(&mut self, addr: u16, data: &[u8]) -> Result<()>;

    /// Read data from a device
    ///
    /// START - ADDR(R) - DATA - STOP
    ///
    /// # Errors
    ///
    /// Same as [`I2cInterface::write`].
    async fn read(&mut self, addr: u16, buffer: &mut [u8]) -> Result<()>;

    /// Write then read from a device
    ///
    /// Commonly used to select a register and then read it back. The two
    /// halves are separate transactions with a STOP in between.
    ///
    /// # Errors
    ///
    /// Same as [`I2cInterface::write`]; the read is skipped if the write
    /// fails.
    async fn write_read(&mut self, addr: u16, write_data: &[u8], read_buffer: &mut [u8])
        -> Result<()>;
}
