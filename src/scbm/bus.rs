//! Blocking bus adapter for device codecs

use crate::platform::traits::{I2cInterface, ScbHardware};
use crate::platform::Result;
use crate::scbm::port::Port;
use crate::scbm::settings::Timeout;

/// [`I2cInterface`] over a [`Port`], with one timeout for every transaction
pub struct BlockingBus<'p, 'a, H: ScbHardware, const SLOTS: usize = 8> {
    port: &'p Port<'a, H, SLOTS>,
    timeout: Timeout,
}

impl<'p, 'a, H: ScbHardware, const SLOTS: usize> BlockingBus<'p, 'a, H, SLOTS> {
    pub fn new(port: &'p Port<'a, H, SLOTS>, timeout: Timeout) -> Self {
        Self { port, timeout }
    }
}

impl<H: ScbHardware, const SLOTS: usize> I2cInterface for BlockingBus<'_, '_, H, SLOTS> {
    async fn write(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        self.port.write(addr, data, self.timeout).await?;
        Ok(())
    }

    async fn read(&mut self, addr: u16, buffer: &mut [u8]) -> Result<()> {
        self.port.read(addr, buffer, self.timeout).await?;
        Ok(())
    }

    async fn write_read(
        &mut self,
        addr: u16,
        write_data: &[u8],
        read_buffer: &mut [u8],
    ) -> Result<()> {
        self.write(addr, write_data).await?;
        self.read(addr, read_buffer).await
    }
}
