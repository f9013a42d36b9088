//! Serial Control Bus controller interface
//!
//! This module defines the register-level operations the transaction engine
//! needs from one SCB master block. Platform implementations map them onto
//! their memory-mapped registers; the mock platform simulates them.

use crate::scbm::timing::TimingConfig;
use bitflags::bitflags;

bitflags! {
    /// Interrupt status / mask bits
    ///
    /// The same layout is used for the status, mask and clear registers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u32 {
        /// Clock line held low past the bus timeout
        const SCLK_LOW = 1 << 0;
        /// Data line held low past the bus timeout
        const SDAT_LOW = 1 << 1;
        /// Start condition observed mid-transaction
        const UNEXPECTED_START = 1 << 2;
        /// Slave did not acknowledge its address
        const ADDRESS_NACK = 1 << 3;
        /// Slave did not acknowledge a written byte
        const WRITE_NACK = 1 << 4;
        /// Read FIFO full
        const READ_FULL = 1 << 5;
        /// Read FIFO at or above its threshold, or holding the tail of a
        /// finished read
        const READ_ALMOST_FULL = 1 << 6;
        /// Write FIFO drained and the last byte clocked out
        const WRITE_EMPTY = 1 << 7;
        /// Write FIFO at or below its threshold
        const WRITE_ALMOST_EMPTY = 1 << 8;
        /// Bus has been idle for the inactivity period
        const BUS_INACTIVE = 1 << 9;
    }
}

impl IrqFlags {
    /// Line-level faults, all classified as a bus error
    pub const LINE_FAULTS: Self = Self::SCLK_LOW
        .union(Self::SDAT_LOW)
        .union(Self::UNEXPECTED_START);

    /// Latched conditions that end a transaction in error
    pub const FAULTS: Self = Self::LINE_FAULTS
        .union(Self::ADDRESS_NACK)
        .union(Self::WRITE_NACK);

    /// Conditions that are always enabled while the port is live
    pub const BASE: Self = Self::LINE_FAULTS
        .union(Self::ADDRESS_NACK)
        .union(Self::WRITE_NACK)
        .union(Self::READ_FULL)
        .union(Self::READ_ALMOST_FULL);
}

bitflags! {
    /// FIFO fill status
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FillFlags: u32 {
        /// No room for another byte in the write FIFO
        const WRITE_FULL = 1 << 0;
        /// Write FIFO drained and the last byte clocked out
        const WRITE_EMPTY = 1 << 1;
        /// Nothing to pop from the read FIFO
        const READ_EMPTY = 1 << 2;
        /// Read FIFO full; the bus stretches the clock until it is drained
        const READ_FULL = 1 << 3;
    }
}

/// SCB master controller interface
///
/// All methods take `&self`: the engine only calls them from inside its
/// critical section, so implementations need no locking of their own beyond
/// what volatile register access already gives them.
///
/// # Invariants
///
/// - `start_write`/`start_read` are only called while the controller is idle
/// - `push_byte` is only called while `WRITE_FULL` is clear
/// - `pop_byte` is only called while `READ_EMPTY` is clear
pub trait ScbHardware {
    /// Largest value the transfer-count register can hold
    const MAX_TRANSFER: usize = 0xFFFF;

    /// Program clock and timing registers and release the block from reset
    fn configure(&self, timing: &TimingConfig);

    /// Mask every interrupt and hold the block in reset
    fn release(&self);

    /// Raw interrupt status
    fn interrupt_status(&self) -> IrqFlags;

    /// Currently enabled interrupts
    fn interrupt_mask(&self) -> IrqFlags;

    /// Replace the interrupt enable mask
    fn set_interrupt_mask(&self, mask: IrqFlags);

    /// Acknowledge latched interrupt conditions
    fn clear_interrupts(&self, flags: IrqFlags);

    /// FIFO fill status
    fn fill_status(&self) -> FillFlags;

    /// Number of bytes still waiting in the write FIFO
    fn write_level(&self) -> usize;

    /// Program the target address and byte count of a write; the transfer
    /// starts as soon as the address is accepted
    fn start_write(&self, address: u16, count: usize);

    /// Program the target address and byte count of a read
    fn start_read(&self, address: u16, count: usize);

    /// Queue one byte for transmission
    fn push_byte(&self, byte: u8);

    /// Take one received byte and advance the read FIFO
    fn pop_byte(&self) -> u8;

    /// Stop the current bus transaction and flush both FIFOs
    fn abort(&self);
}
