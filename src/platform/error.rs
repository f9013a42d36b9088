//! Serial bus master error types
//!
//! This module defines the error types returned at the port boundary. None of
//! them are fatal: a caller may retry, cancel or re-initialise the port.

use core::fmt;

/// Result type for port operations
pub type Result<T> = core::result::Result<T, ScbmError>;

/// Port-level errors
///
/// Hardware-detected problems are reported through [`ScbmError::Bus`]; the
/// remaining variants describe what happened to the request itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScbmError {
    /// Block index outside the registry
    InvalidPort,
    /// The transaction ended on a bus fault
    Bus(BusFault),
    /// The transaction was cancelled (queued or active)
    Cancelled,
    /// The caller's deadline elapsed first
    Timeout,
    /// No free transaction slot, or no completed result to collect
    WouldBlock,
}

/// Bus fault classification
///
/// This is the "error status" of a port: the classification of the most
/// recent transaction that ended on the bus rather than by request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusFault {
    /// Slave did not acknowledge its address
    AddressNack,
    /// Slave did not acknowledge a data byte during a write
    DataNack,
    /// Clock or data line held low, or an unexpected start condition
    BusError,
    /// Bus went idle with bytes still outstanding
    BusInactive,
}

/// Blocking transfer failure
///
/// Carries the number of bytes that were actually moved before the
/// transaction ended, so partial progress is never lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferError {
    /// Why the transfer stopped
    pub error: ScbmError,
    /// Bytes transferred before it stopped
    pub transferred: usize,
}

/// Rejected asynchronous submission
///
/// The slot pool was exhausted. The caller's buffer is handed back so the
/// request can be retried.
#[derive(Debug)]
pub struct WouldBlock(pub &'static mut [u8]);

impl From<BusFault> for ScbmError {
    fn from(fault: BusFault) -> Self {
        ScbmError::Bus(fault)
    }
}

impl From<WouldBlock> for ScbmError {
    fn from(_: WouldBlock) -> Self {
        ScbmError::WouldBlock
    }
}

impl From<TransferError> for ScbmError {
    fn from(e: TransferError) -> Self {
        e.error
    }
}

impl fmt::Display for ScbmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScbmError::InvalidPort => write!(f, "invalid port"),
            ScbmError::Bus(fault) => write!(f, "bus fault: {}", fault),
            ScbmError::Cancelled => write!(f, "transaction cancelled"),
            ScbmError::Timeout => write!(f, "transaction timed out"),
            ScbmError::WouldBlock => write!(f, "operation would block"),
        }
    }
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusFault::AddressNack => write!(f, "address not acknowledged"),
            BusFault::DataNack => write!(f, "data not acknowledged"),
            BusFault::BusError => write!(f, "bus error"),
            BusFault::BusInactive => write!(f, "bus inactive"),
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} bytes", self.error, self.transferred)
    }
}
