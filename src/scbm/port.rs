//! SCBM port
//!
//! A [`Port`] is the caller's handle on one initialised hardware block. It
//! exposes the blocking read/write primitives, the asynchronous submission
//! API, result collection and cancellation.
//!
//! # Completion modes
//!
//! - **Blocking**: [`Port::read`] / [`Port::write`] suspend the calling task
//!   until the transaction completes, fails, or the timeout elapses.
//! - **Callback**: [`Notify::Callback`] runs a function from interrupt
//!   context with the [`Completion`].
//! - **Mailbox**: [`Notify::Mailbox`] keeps the completion until
//!   [`Port::get_result`] collects it, oldest first.
//! - **Discard**: [`Notify::Discard`] drops the result.
//!
//! Blocking and asynchronous transactions share the block's slot pool and are
//! serviced strictly in submission order.

use core::future::{poll_fn, Future};
use core::task::Poll;

use embassy_time::{with_timeout, Instant};

use crate::platform::traits::{IrqFlags, ScbHardware};
use crate::platform::{BusFault, Result, ScbmError, TransferError, WouldBlock};
use crate::scbm::device::ScbmDevice;
use crate::scbm::registry::Registry;
use crate::scbm::settings::{Direction, Settings, Timeout, ADDR_UPPER_LIMIT};
use crate::scbm::slot::{Completion, Mode, Notify, RawBuf, Record, Request, SlotId};
use crate::scbm::timing::compute_timing;
use crate::{log_info, log_warn};

/// Handle on an initialised SCB master block
///
/// Dropping the port has the same effect as [`Port::deinit`].
pub struct Port<'a, H: ScbHardware, const SLOTS: usize = 8> {
    device: &'a ScbmDevice<H, SLOTS>,
    settings: Settings,
}

impl<'a, H: ScbHardware, const SLOTS: usize> Port<'a, H, SLOTS> {
    /// Claim block `settings.block_index` and program it
    ///
    /// # Errors
    ///
    /// Returns `ScbmError::InvalidPort` if the block index is outside the
    /// registry.
    ///
    /// # Panics
    ///
    /// Panics if the block is already owned by another port.
    pub fn init<const BLOCKS: usize>(
        registry: &'a Registry<H, BLOCKS, SLOTS>,
        settings: Settings,
    ) -> Result<Self> {
        let device = registry.device(settings.block_index)?;
        let timing = compute_timing(&settings);

        let claimed = device.with_engine(|hw, engine| {
            if engine.is_claimed() {
                return false;
            }
            engine.claim(settings.enable_bus_inactive);
            hw.set_interrupt_mask(IrqFlags::empty());
            hw.configure(&timing);
            hw.clear_interrupts(IrqFlags::all());
            hw.set_interrupt_mask(engine.interrupt_mask());
            true
        });
        assert!(claimed, "SCBM block {} already initialised", settings.block_index);

        log_info!(
            "SCBM{} init: {} kHz, inc {}, tick {} ns",
            settings.block_index,
            settings.bitrate_khz,
            timing.increment,
            timing.period_ns
        );

        Ok(Self { device, settings })
    }

    /// Cancel everything outstanding and release the block
    ///
    /// Every queued or active transaction receives its cancelled completion;
    /// uncollected mailbox results are discarded. The block may be
    /// initialised again afterwards.
    pub fn deinit(self) {
        drop(self);
    }

    /// Settings the port was initialised with
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Device context behind this port
    pub fn device(&self) -> &'a ScbmDevice<H, SLOTS> {
        self.device
    }

    /// Classification of the most recent transaction that ended on a bus
    /// fault, cleared when the next transaction starts
    pub fn error_status(&self) -> Option<BusFault> {
        self.device.with_engine(|_, engine| engine.last_error())
    }

    /// Read `buffer.len()` bytes from `address`, blocking until done
    ///
    /// # Errors
    ///
    /// The error carries the number of bytes received before the
    /// transaction ended.
    ///
    /// # Panics
    ///
    /// Panics if `address` exceeds 10 bits, or `buffer` is empty or longer
    /// than the transfer-count register allows.
    pub async fn read(
        &self,
        address: u16,
        buffer: &mut [u8],
        timeout: Timeout,
    ) -> core::result::Result<usize, TransferError> {
        check_request::<H>(Direction::Read, address, buffer.len());
        let request = Request {
            direction: Direction::Read,
            address,
            buffer: RawBuf::from_mut(buffer),
            mode: Mode::Blocking,
        };
        self.transact(request, timeout).await
    }

    /// Write `data` to `address`, blocking until done
    ///
    /// An empty `data` only probes whether the address is acknowledged.
    ///
    /// # Errors
    ///
    /// The error carries the number of bytes acknowledged before the
    /// transaction ended.
    ///
    /// # Panics
    ///
    /// Panics if `address` exceeds 10 bits or `data` is longer than the
    /// transfer-count register allows.
    pub async fn write(
        &self,
        address: u16,
        data: &[u8],
        timeout: Timeout,
    ) -> core::result::Result<usize, TransferError> {
        check_request::<H>(Direction::Write, address, data.len());
        let request = Request {
            direction: Direction::Write,
            address,
            buffer: RawBuf::from_ref(data),
            mode: Mode::Blocking,
        };
        self.transact(request, timeout).await
    }

    /// Queue a read into `buffer`, returning immediately
    ///
    /// # Errors
    ///
    /// Returns the buffer inside [`WouldBlock`] when no slot is free.
    pub fn submit_read(
        &self,
        address: u16,
        buffer: &'static mut [u8],
        notify: Notify,
    ) -> core::result::Result<(), WouldBlock> {
        check_request::<H>(Direction::Read, address, buffer.len());
        self.submit(Direction::Read, address, buffer, notify)
    }

    /// Queue a write of `buffer`, returning immediately
    ///
    /// # Errors
    ///
    /// Returns the buffer inside [`WouldBlock`] when no slot is free.
    pub fn submit_write(
        &self,
        address: u16,
        buffer: &'static mut [u8],
        notify: Notify,
    ) -> core::result::Result<(), WouldBlock> {
        check_request::<H>(Direction::Write, address, buffer.len());
        self.submit(Direction::Write, address, buffer, notify)
    }

    /// Collect the oldest uncollected [`Notify::Mailbox`] completion
    ///
    /// With `block == false` this never waits.
    ///
    /// # Errors
    ///
    /// `ScbmError::WouldBlock` if nothing is ready and `block` is false;
    /// `ScbmError::Timeout` if nothing became ready in time.
    pub async fn get_result(&self, block: bool, timeout: Timeout) -> Result<Completion> {
        if !block {
            return self.try_get_result();
        }
        let ready = poll_fn(|cx| {
            self.device.with_engine(|_, engine| match engine.take_result() {
                Some(completion) => Poll::Ready(completion),
                None => {
                    engine.register_mailbox_waker(cx.waker());
                    Poll::Pending
                }
            })
        });
        let deadline = timeout.deadline(Instant::now());
        wait_until(deadline, ready).await.ok_or(ScbmError::Timeout)
    }

    /// Non-blocking [`Port::get_result`]
    pub fn try_get_result(&self) -> Result<Completion> {
        self.device
            .with_engine(|_, engine| engine.take_result())
            .ok_or(ScbmError::WouldBlock)
    }

    /// Cancel the active transaction and every queued one
    ///
    /// Each receives exactly one completion with `ScbmError::Cancelled`; the
    /// active one reports the bytes it had already moved. Callbacks run
    /// before this returns.
    pub fn cancel(&self) {
        let cancelled = self.device.with_engine(|hw, engine| engine.cancel_all(hw));
        if cancelled > 0 {
            log_info!("SCBM{} cancelled {} transactions", self.settings.block_index, cancelled);
        }
        self.device.dispatch();
    }

    fn submit(
        &self,
        direction: Direction,
        address: u16,
        buffer: &'static mut [u8],
        notify: Notify,
    ) -> core::result::Result<(), WouldBlock> {
        let request = Request {
            direction,
            address,
            buffer: RawBuf::from_mut(buffer),
            mode: Mode::Async(notify),
        };
        match self.device.with_engine(|hw, engine| engine.submit(hw, request)) {
            Some(_) => Ok(()),
            None => Err(WouldBlock(buffer)),
        }
    }

    async fn transact(
        &self,
        request: Request,
        timeout: Timeout,
    ) -> core::result::Result<usize, TransferError> {
        let deadline = timeout.deadline(Instant::now());

        let acquire = poll_fn(|cx| {
            self.device.with_engine(|hw, engine| {
                match engine.poll_submit(hw, request, cx.waker()) {
                    Some(id) => Poll::Ready(id),
                    None => Poll::Pending,
                }
            })
        });
        let Some(id) = wait_until(deadline, acquire).await else {
            return Err(TransferError {
                error: ScbmError::Timeout,
                transferred: 0,
            });
        };

        let pending = PendingTransfer {
            device: self.device,
            id,
        };
        let record = match wait_until(deadline, pending.completion()).await {
            Some(record) => record,
            None => pending.abandon(),
        };

        match record.result {
            Ok(()) => Ok(record.transferred),
            Err(error) => Err(TransferError {
                error,
                transferred: record.transferred,
            }),
        }
    }
}

impl<H: ScbHardware, const SLOTS: usize> Drop for Port<'_, H, SLOTS> {
    fn drop(&mut self) {
        self.device.with_engine(|hw, engine| {
            engine.cancel_all(hw);
        });
        self.device.dispatch();
        self.device.with_engine(|hw, engine| {
            engine.unclaim();
            hw.set_interrupt_mask(IrqFlags::empty());
            hw.release();
        });
        log_info!("SCBM{} deinit", self.settings.block_index);
    }
}

/// A blocking transaction in flight
///
/// Dropping it abandons the transaction, so the engine never touches the
/// caller's buffer after the borrow ends.
struct PendingTransfer<'d, H: ScbHardware, const SLOTS: usize> {
    device: &'d ScbmDevice<H, SLOTS>,
    id: SlotId,
}

impl<H: ScbHardware, const SLOTS: usize> PendingTransfer<'_, H, SLOTS> {
    fn completion(&self) -> impl Future<Output = Record> + '_ {
        poll_fn(move |cx| {
            self.device.with_engine(|_, engine| match engine.poll_record(self.id, cx.waker()) {
                Some(record) => Poll::Ready(record),
                None => Poll::Pending,
            })
        })
    }

    /// Give up on the transaction, returning its final record
    fn abandon(&self) -> Record {
        let record = self
            .device
            .with_engine(|hw, engine| engine.abandon(hw, self.id));
        match record {
            Some(record) => record,
            None => Record {
                transferred: 0,
                result: Err(ScbmError::Timeout),
            },
        }
    }
}

impl<H: ScbHardware, const SLOTS: usize> Drop for PendingTransfer<'_, H, SLOTS> {
    fn drop(&mut self) {
        let record = self.device.with_engine(|hw, engine| engine.abandon(hw, self.id));
        if record.is_some_and(|r| r.result.is_err()) {
            log_warn!("SCBM{} blocking transfer dropped", self.device.index());
        }
    }
}

/// Await `fut`, giving up at `deadline`
async fn wait_until<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        None => Some(fut.await),
        Some(at) => {
            let remaining = at.saturating_duration_since(Instant::now());
            with_timeout(remaining, fut).await.ok()
        }
    }
}

fn check_request<H: ScbHardware>(direction: Direction, address: u16, len: usize) {
    assert!(
        address <= ADDR_UPPER_LIMIT,
        "SCBM address {:#x} out of range",
        address
    );
    assert!(len <= H::MAX_TRANSFER, "SCBM transfer of {} bytes too long", len);
    assert!(
        direction == Direction::Write || len > 0,
        "SCBM read needs a non-empty buffer"
    );
}
