//! Hardware block registry
//!
//! Owns one lazily-created [`ScbmDevice`] per block index. A block's device
//! is created exactly once, the first time a port is initialised on it or
//! when it is defined explicitly, and lives as long as the registry.
//!
//! ```ignore
//! static SCBM: Registry<Rp2350Scb> = Registry::new(Rp2350Scb::for_block);
//!
//! #[interrupt]
//! fn SCB0_IRQ() {
//!     if let Some(device) = SCBM.get(0) {
//!         device.on_interrupt();
//!     }
//! }
//! ```

use embassy_sync::once_lock::OnceLock;

use crate::platform::traits::ScbHardware;
use crate::platform::{Result, ScbmError};
use crate::scbm::device::ScbmDevice;

/// Default number of hardware blocks
pub const MAX_BLOCKS: usize = 8;

/// Registry of SCB master blocks
pub struct Registry<H, const BLOCKS: usize = MAX_BLOCKS, const SLOTS: usize = 8> {
    define: fn(usize) -> H,
    blocks: [OnceLock<ScbmDevice<H, SLOTS>>; BLOCKS],
}

impl<H: ScbHardware, const BLOCKS: usize, const SLOTS: usize> Registry<H, BLOCKS, SLOTS> {
    /// Create an empty registry; `define` builds the hardware handle of a
    /// block on first use.
    pub const fn new(define: fn(usize) -> H) -> Self {
        Self {
            define,
            blocks: [const { OnceLock::new() }; BLOCKS],
        }
    }

    /// Number of block indices this registry covers
    pub const fn capacity(&self) -> usize {
        BLOCKS
    }

    /// Device for `index`, creating it on first use
    ///
    /// # Errors
    ///
    /// Returns `ScbmError::InvalidPort` if `index` is out of range.
    pub fn device(&self, index: usize) -> Result<&ScbmDevice<H, SLOTS>> {
        let block = self.blocks.get(index).ok_or(ScbmError::InvalidPort)?;
        Ok(block.get_or_init(|| ScbmDevice::new(index, (self.define)(index))))
    }

    /// Device for `index` if it has been created
    ///
    /// Interrupt handlers use this so that a stray interrupt never creates a
    /// device.
    pub fn get(&self, index: usize) -> Option<&ScbmDevice<H, SLOTS>> {
        self.blocks.get(index)?.try_get()
    }

    /// Register block `index` with an explicit hardware handle
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or the block already has a device.
    pub fn define(&self, index: usize, hw: H) -> &ScbmDevice<H, SLOTS> {
        assert!(index < BLOCKS, "SCBM block {} out of range", index);
        let block = &self.blocks[index];
        assert!(
            block.init(ScbmDevice::new(index, hw)).is_ok(),
            "SCBM block {} already defined",
            index
        );
        // Initialised just above
        match block.try_get() {
            Some(device) => device,
            None => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockScb;

    fn mock(_index: usize) -> MockScb {
        MockScb::new()
    }

    #[test]
    fn test_device_out_of_range() {
        let registry = Registry::<MockScb, 2>::new(mock);
        assert_eq!(registry.capacity(), 2);
        assert!(matches!(registry.device(2), Err(ScbmError::InvalidPort)));
    }

    #[test]
    fn test_device_created_once() {
        let registry = Registry::<MockScb, 2>::new(mock);
        assert!(registry.get(1).is_none());
        let first = registry.device(1).unwrap() as *const _;
        let second = registry.device(1).unwrap() as *const _;
        assert_eq!(first, second);
        assert_eq!(registry.get(1).unwrap().index(), 1);
    }

    #[test]
    fn test_define_registers_handle() {
        let registry = Registry::<MockScb, 2>::new(mock);
        let hw = MockScb::new();
        hw.attach(0x4C);
        let device = registry.define(0, hw);
        assert!(device.hardware().is_attached(0x4C));
    }

    #[test]
    #[should_panic(expected = "already defined")]
    fn test_define_twice_panics() {
        let registry = Registry::<MockScb, 2>::new(mock);
        registry.define(0, MockScb::new());
        registry.define(0, MockScb::new());
    }
}
