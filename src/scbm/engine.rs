//! Transaction engine
//!
//! The mutable per-block state shared by the submission path and the
//! interrupt handler, together with the FIFO servicing state machine.
//!
//! Every method here runs inside the device's critical section and receives
//! the hardware handle explicitly; nothing in this module blocks or waits.
//!
//! # State machine
//!
//! ```text
//! Idle -> Started -> Filling (write) | Draining (read) -> Completed | Errored
//! ```
//!
//! A transaction is started from the submission path (or from the completion
//! of its predecessor): the address and count are programmed and the first
//! FIFO pass runs inline. Every later step happens in [`Engine::service`].

use core::task::Waker;

use embassy_sync::waitqueue::{MultiWakerRegistration, WakerRegistration};
use heapless::Deque;

use crate::platform::traits::{FillFlags, IrqFlags, ScbHardware};
use crate::platform::{BusFault, ScbmError};
use crate::scbm::settings::Direction;
use crate::scbm::slot::{Completion, Mode, Notify, RawBuf, Record, Request, SlotId, SlotPool};
use crate::{log_debug, log_trace, log_warn};

/// Tasks that may wait for a free slot at the same time
const SLOT_WAITERS: usize = 4;

/// The active (hardware-started) transaction
#[derive(Debug)]
struct Transfer {
    slot: SlotId,
    direction: Direction,
    requested: usize,
    /// Bytes pushed into the write FIFO
    pushed: usize,
    /// Bytes drained from the read FIFO
    drained: usize,
    buffer: RawBuf,
}

impl Transfer {
    /// Bytes confirmed on the bus so far
    fn transferred<H: ScbHardware>(&self, hw: &H) -> usize {
        match self.direction {
            Direction::Read => self.drained,
            Direction::Write => self.pushed.saturating_sub(hw.write_level()),
        }
    }

    fn outstanding<H: ScbHardware>(&self, hw: &H) -> usize {
        self.requested - self.transferred(hw)
    }
}

/// Per-block transaction state
pub(crate) struct Engine<const SLOTS: usize> {
    claimed: bool,
    enable_bus_inactive: bool,
    pool: SlotPool<SLOTS>,
    active: Option<Transfer>,
    queue: Deque<SlotId, SLOTS>,
    /// Finished callback transactions whose callback has not run yet
    callbacks: Deque<SlotId, SLOTS>,
    /// Finished mailbox transactions awaiting `get_result`
    mailbox: Deque<SlotId, SLOTS>,
    last_error: Option<BusFault>,
    mailbox_waker: WakerRegistration,
    slot_waiters: MultiWakerRegistration<SLOT_WAITERS>,
}

impl<const SLOTS: usize> Engine<SLOTS> {
    pub(crate) fn new() -> Self {
        Self {
            claimed: false,
            enable_bus_inactive: false,
            pool: SlotPool::new(),
            active: None,
            queue: Deque::new(),
            callbacks: Deque::new(),
            mailbox: Deque::new(),
            last_error: None,
            mailbox_waker: WakerRegistration::new(),
            slot_waiters: MultiWakerRegistration::new(),
        }
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// Take ownership of the block and reset transaction state
    pub(crate) fn claim(&mut self, enable_bus_inactive: bool) {
        self.claimed = true;
        self.enable_bus_inactive = enable_bus_inactive;
        self.last_error = None;
    }

    /// Give up ownership; pending mailbox results are discarded
    pub(crate) fn unclaim(&mut self) {
        while let Some(id) = self.mailbox.pop_front() {
            self.pool.release(id);
        }
        self.claimed = false;
        self.last_error = None;
    }

    pub(crate) fn last_error(&self) -> Option<BusFault> {
        self.last_error
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    /// Interrupt enables for the current state
    pub(crate) fn interrupt_mask(&self) -> IrqFlags {
        let mut mask = IrqFlags::BASE;
        if self.enable_bus_inactive {
            mask |= IrqFlags::BUS_INACTIVE;
        }
        if let Some(t) = &self.active {
            if t.direction == Direction::Write {
                if t.pushed < t.requested {
                    mask |= IrqFlags::WRITE_ALMOST_EMPTY;
                } else {
                    mask |= IrqFlags::WRITE_EMPTY;
                }
            }
        }
        mask
    }

    /// Queue a transaction, starting it at once if the hardware is idle
    ///
    /// Returns `None` when every slot is occupied.
    pub(crate) fn submit<H: ScbHardware>(&mut self, hw: &H, request: Request) -> Option<SlotId> {
        let Some(id) = self.pool.alloc(request) else {
            log_debug!("SCBM slot pool exhausted");
            return None;
        };
        // One queue entry per occupied slot, so this cannot overflow
        let _ = self.queue.push_back(id);
        if self.active.is_none() {
            self.start_next(hw);
            hw.set_interrupt_mask(self.interrupt_mask());
        }
        Some(id)
    }

    /// Submit, or park the waker until a slot frees up
    pub(crate) fn poll_submit<H: ScbHardware>(
        &mut self,
        hw: &H,
        request: Request,
        waker: &Waker,
    ) -> Option<SlotId> {
        let id = self.submit(hw, request);
        if id.is_none() {
            self.slot_waiters.register(waker);
        }
        id
    }

    /// Take the record of a finished blocking transaction and free its slot,
    /// or park the waker
    pub(crate) fn poll_record(&mut self, id: SlotId, waker: &Waker) -> Option<Record> {
        if self.pool.record(id).is_some() {
            let (_, record) = self.release(id)?;
            return record;
        }
        self.pool.register_waker(id, waker);
        None
    }

    /// Pop the oldest mailbox completion
    pub(crate) fn take_result(&mut self) -> Option<Completion> {
        let id = self.mailbox.pop_front()?;
        let (request, record) = self.release(id)?;
        Some(completion(request, record?))
    }

    pub(crate) fn register_mailbox_waker(&mut self, waker: &Waker) {
        self.mailbox_waker.register(waker);
    }

    /// Pop the oldest finished callback transaction
    ///
    /// The callback must be invoked outside the critical section.
    pub(crate) fn take_callback(&mut self) -> Option<(fn(Completion), Completion)> {
        let id = self.callbacks.pop_front()?;
        let (request, record) = self.release(id)?;
        match request.mode {
            Mode::Async(Notify::Callback(callback)) => Some((callback, completion(request, record?))),
            _ => None,
        }
    }

    /// Stop tracking a blocking transaction whose owner gave up
    ///
    /// A transaction that already finished keeps its real outcome, including
    /// one the hardware completed before its interrupt was serviced.
    /// Otherwise it is pulled from the queue or aborted on the bus and
    /// reported as timed out with whatever was transferred. Returns `None`
    /// for a stale handle.
    pub(crate) fn abandon<H: ScbHardware>(&mut self, hw: &H, id: SlotId) -> Option<Record> {
        if let Some(record) = self.pool.record(id) {
            self.release(id);
            return Some(record);
        }
        if !self.pool.is_pending(id) {
            return None;
        }

        let (transferred, done) = if self.active.as_ref().is_some_and(|t| t.slot == id) {
            let stopped = self.stop_active(hw);
            self.start_next(hw);
            hw.set_interrupt_mask(self.interrupt_mask());
            stopped
        } else {
            self.remove_queued(id);
            (0, false)
        };
        self.release(id);
        if done {
            return Some(Record {
                transferred,
                result: Ok(()),
            });
        }
        log_warn!("SCBM transaction abandoned after {} bytes", transferred);
        Some(Record {
            transferred,
            result: Err(ScbmError::Timeout),
        })
    }

    /// Cancel the active transaction and everything queued behind it
    ///
    /// An active transaction the hardware already finished completes
    /// normally. Returns the number of transactions cancelled.
    pub(crate) fn cancel_all<H: ScbHardware>(&mut self, hw: &H) -> usize {
        let mut cancelled = 0;
        if let Some(slot) = self.active.as_ref().map(|t| t.slot) {
            let (transferred, done) = self.stop_active(hw);
            let result = if done {
                Ok(())
            } else {
                cancelled += 1;
                Err(ScbmError::Cancelled)
            };
            self.finish(slot, Record { transferred, result });
        }
        while let Some(id) = self.queue.pop_front() {
            self.finish(
                id,
                Record {
                    transferred: 0,
                    result: Err(ScbmError::Cancelled),
                },
            );
            cancelled += 1;
        }
        hw.clear_interrupts(IrqFlags::all());
        hw.set_interrupt_mask(self.interrupt_mask());
        cancelled
    }

    /// Service one interrupt
    pub(crate) fn service<H: ScbHardware>(&mut self, hw: &H) {
        let status = hw.interrupt_status();
        let pending = status & hw.interrupt_mask();
        log_trace!("SCBM irq {}", pending.bits());

        let Some(mut t) = self.active.take() else {
            hw.clear_interrupts(status);
            hw.set_interrupt_mask(self.interrupt_mask());
            return;
        };
        let slot = t.slot;

        let mut fault = None;
        if pending.intersects(IrqFlags::LINE_FAULTS) {
            fault = Some(BusFault::BusError);
        } else if pending.contains(IrqFlags::ADDRESS_NACK) {
            fault = Some(BusFault::AddressNack);
        } else if pending.contains(IrqFlags::WRITE_NACK) {
            fault = Some(BusFault::DataNack);
        } else {
            if pending.intersects(IrqFlags::READ_FULL | IrqFlags::READ_ALMOST_FULL) {
                drain(hw, &mut t);
            }
            if pending.intersects(IrqFlags::WRITE_EMPTY | IrqFlags::WRITE_ALMOST_EMPTY) {
                fill(hw, &mut t);
            }
            if pending.contains(IrqFlags::BUS_INACTIVE) && t.outstanding(hw) > 0 {
                fault = Some(BusFault::BusInactive);
            }
        }
        hw.clear_interrupts(status);

        let record = match fault {
            Some(fault) => {
                self.active = Some(t);
                let (moved, _) = self.stop_active(hw);
                let transferred = if fault == BusFault::AddressNack { 0 } else { moved };
                log_warn!("SCBM bus fault {:?} after {} bytes", fault, transferred);
                self.last_error = Some(fault);
                Some((transferred, Err(ScbmError::Bus(fault))))
            }
            None if is_complete(hw, &t) => Some((t.requested, Ok(()))),
            None => {
                self.active = Some(t);
                None
            }
        };

        if let Some((transferred, result)) = record {
            self.finish(slot, Record { transferred, result });
            self.start_next(hw);
        }
        hw.set_interrupt_mask(self.interrupt_mask());
    }

    /// Start the oldest queued transaction, if the hardware is idle
    fn start_next<H: ScbHardware>(&mut self, hw: &H) {
        if self.active.is_some() {
            return;
        }
        while let Some(id) = self.queue.pop_front() {
            let Some(request) = self.pool.request(id) else {
                continue;
            };
            let mut t = Transfer {
                slot: id,
                direction: request.direction,
                requested: request.buffer.len(),
                pushed: 0,
                drained: 0,
                buffer: request.buffer,
            };
            self.last_error = None;
            hw.clear_interrupts(IrqFlags::all());
            match t.direction {
                Direction::Write => {
                    hw.start_write(request.address, t.requested);
                    fill(hw, &mut t);
                }
                Direction::Read => {
                    hw.start_read(request.address, t.requested);
                    drain(hw, &mut t);
                }
            }
            self.active = Some(t);
            return;
        }
    }

    /// Abort the active transaction on the bus
    ///
    /// Returns its byte count and whether the hardware had already finished
    /// it before the abort.
    fn stop_active<H: ScbHardware>(&mut self, hw: &H) -> (usize, bool) {
        let Some(mut t) = self.active.take() else {
            return (0, false);
        };
        if t.direction == Direction::Read {
            drain(hw, &mut t);
        }
        let transferred = t.transferred(hw);
        let done = is_complete(hw, &t) && !hw.interrupt_status().intersects(IrqFlags::FAULTS);
        hw.abort();
        hw.clear_interrupts(IrqFlags::all());
        (transferred, done)
    }

    fn remove_queued(&mut self, id: SlotId) {
        let len = self.queue.len();
        for _ in 0..len {
            if let Some(queued) = self.queue.pop_front() {
                if queued != id {
                    let _ = self.queue.push_back(queued);
                }
            }
        }
    }

    /// Record the outcome of a transaction and route it to its owner
    fn finish(&mut self, id: SlotId, record: Record) {
        let Some(request) = self.pool.request(id) else {
            return;
        };
        if !self.pool.complete(id, record) {
            return;
        }
        match request.mode {
            // The pool already woke the owner
            Mode::Blocking => {}
            Mode::Async(Notify::Discard) => {
                self.release(id);
            }
            Mode::Async(Notify::Mailbox) => {
                let _ = self.mailbox.push_back(id);
                self.mailbox_waker.wake();
            }
            Mode::Async(Notify::Callback(_)) => {
                let _ = self.callbacks.push_back(id);
            }
        }
    }

    /// Free a slot and let slot waiters retry
    fn release(&mut self, id: SlotId) -> Option<(Request, Option<Record>)> {
        let released = self.pool.release(id);
        if released.is_some() {
            self.slot_waiters.wake();
        }
        released
    }
}

fn completion(request: Request, record: Record) -> Completion {
    Completion {
        direction: request.direction,
        address: request.address,
        // SAFETY: asynchronous requests are built from `&'static mut` buffers
        // and the slot holding the capture has just been released.
        buffer: unsafe { request.buffer.into_static() },
        transferred: record.transferred,
        result: record.result,
    }
}

/// Push as many remaining bytes as the write FIFO accepts
fn fill<H: ScbHardware>(hw: &H, t: &mut Transfer) {
    while t.pushed < t.requested && !hw.fill_status().contains(FillFlags::WRITE_FULL) {
        // SAFETY: the buffer is live while its slot is active and pushed < len.
        hw.push_byte(unsafe { t.buffer.get(t.pushed) });
        t.pushed += 1;
    }
}

/// Move every received byte into the caller's buffer
fn drain<H: ScbHardware>(hw: &H, t: &mut Transfer) {
    while t.drained < t.requested && !hw.fill_status().contains(FillFlags::READ_EMPTY) {
        let byte = hw.pop_byte();
        // SAFETY: reads are captured from `&mut [u8]` and drained < len.
        unsafe { t.buffer.set(t.drained, byte) };
        t.drained += 1;
    }
}

/// Reads finish once every byte is drained; writes also need the FIFO empty
/// and the last byte clocked out.
fn is_complete<H: ScbHardware>(hw: &H, t: &Transfer) -> bool {
    match t.direction {
        Direction::Read => t.drained == t.requested,
        Direction::Write => {
            t.pushed == t.requested && hw.fill_status().contains(FillFlags::WRITE_EMPTY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockScb, FIFO_DEPTH};

    const PEER: u16 = 0x4C;

    fn leak(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; len].into_boxed_slice())
    }

    fn request(direction: Direction, buffer: &'static mut [u8], mode: Mode) -> Request {
        Request {
            direction,
            address: PEER,
            buffer: RawBuf::from_mut(buffer),
            mode,
        }
    }

    fn setup() -> (MockScb, Engine<4>) {
        let hw = MockScb::new();
        hw.attach(PEER);
        let mut engine = Engine::new();
        engine.claim(false);
        hw.set_interrupt_mask(engine.interrupt_mask());
        (hw, engine)
    }

    /// Step the bus, servicing interrupts, until it stops moving
    fn run(hw: &MockScb, engine: &mut Engine<4>) {
        while hw.step() {
            while hw.irq_pending() {
                engine.service(hw);
            }
        }
    }

    #[test]
    fn test_mask_follows_write_progress() {
        let (hw, mut engine) = setup();
        let mailbox = Mode::Async(Notify::Mailbox);
        engine
            .submit(&hw, request(Direction::Write, leak(12), mailbox))
            .unwrap();
        assert_eq!(hw.write_level(), FIFO_DEPTH);
        assert!(hw.interrupt_mask().contains(IrqFlags::WRITE_ALMOST_EMPTY));

        while !hw.interrupt_mask().contains(IrqFlags::WRITE_EMPTY) {
            assert!(hw.step());
            if hw.irq_pending() {
                engine.service(&hw);
            }
        }
        assert!(!hw.interrupt_mask().contains(IrqFlags::WRITE_ALMOST_EMPTY));

        run(&hw, &mut engine);
        let completion = engine.take_result().unwrap();
        assert_eq!(completion.transferred, 12);
        assert_eq!(completion.result, Ok(()));
        assert_eq!(hw.interrupt_mask(), IrqFlags::BASE);
    }

    #[test]
    fn test_cancel_all_reports_each_once() {
        let (hw, mut engine) = setup();
        hw.set_data(PEER, &[0x11, 0x22, 0x33]);
        for _ in 0..3 {
            engine
                .submit(&hw, request(Direction::Read, leak(3), Mode::Async(Notify::Mailbox)))
                .unwrap();
        }
        // Address phase plus one data byte of the active read
        assert!(hw.step());
        assert!(hw.step());

        assert_eq!(engine.cancel_all(&hw), 3);
        let first = engine.take_result().unwrap();
        assert_eq!(first.transferred, 1);
        assert_eq!(first.data(), &[0x11]);
        assert_eq!(first.result, Err(ScbmError::Cancelled));
        for _ in 0..2 {
            let queued = engine.take_result().unwrap();
            assert_eq!(queued.transferred, 0);
            assert_eq!(queued.result, Err(ScbmError::Cancelled));
        }
        assert!(engine.take_result().is_none());
        assert!(engine.is_idle());
        assert!(!hw.is_busy());
    }

    #[test]
    fn test_finished_transaction_survives_abandon() {
        let (hw, mut engine) = setup();
        let id = engine
            .submit(&hw, request(Direction::Write, leak(2), Mode::Blocking))
            .unwrap();
        run(&hw, &mut engine);

        let record = engine.abandon(&hw, id).unwrap();
        assert_eq!(record.transferred, 2);
        assert_eq!(record.result, Ok(()));
        assert!(engine.abandon(&hw, id).is_none());
    }

    #[test]
    fn test_queued_abandon_leaves_active_running() {
        let (hw, mut engine) = setup();
        let mailbox = Mode::Async(Notify::Mailbox);
        engine
            .submit(&hw, request(Direction::Write, leak(1), mailbox))
            .unwrap();
        let queued = engine
            .submit(&hw, request(Direction::Write, leak(1), Mode::Blocking))
            .unwrap();

        let record = engine.abandon(&hw, queued).unwrap();
        assert_eq!(record.result, Err(ScbmError::Timeout));
        assert_eq!(record.transferred, 0);

        run(&hw, &mut engine);
        assert_eq!(engine.take_result().unwrap().result, Ok(()));
        assert!(engine.is_idle());
    }

    #[test]
    fn test_bus_inactive_fault_only_when_enabled() {
        let (hw, mut engine) = setup();
        engine.claim(true);
        hw.disconnect_after(PEER, 2);
        engine
            .submit(&hw, request(Direction::Write, leak(4), Mode::Async(Notify::Mailbox)))
            .unwrap();
        assert!(hw.interrupt_mask().contains(IrqFlags::BUS_INACTIVE));

        run(&hw, &mut engine);
        let completion = engine.take_result().unwrap();
        assert_eq!(completion.transferred, 2);
        assert_eq!(
            completion.result,
            Err(ScbmError::Bus(BusFault::BusInactive))
        );
        assert_eq!(engine.last_error(), Some(BusFault::BusInactive));
    }

    #[test]
    fn test_line_fault_classified_as_bus_error() {
        for fault in [IrqFlags::SCLK_LOW, IrqFlags::SDAT_LOW, IrqFlags::UNEXPECTED_START] {
            let (hw, mut engine) = setup();
            engine
                .submit(&hw, request(Direction::Write, leak(4), Mode::Async(Notify::Mailbox)))
                .unwrap();
            assert!(hw.step());
            hw.raise(fault);
            engine.service(&hw);

            let completion = engine.take_result().unwrap();
            assert_eq!(completion.result, Err(ScbmError::Bus(BusFault::BusError)));
            assert_eq!(completion.transferred, 0);
            assert_eq!(engine.last_error(), Some(BusFault::BusError));
            assert!(!hw.is_busy());
        }
    }

    #[test]
    fn test_cancel_after_bus_finished_read_reports_success() {
        let (hw, mut engine) = setup();
        hw.set_data(PEER, &[0x5A]);
        engine
            .submit(&hw, request(Direction::Read, leak(1), Mode::Async(Notify::Mailbox)))
            .unwrap();
        // Address phase and the only data byte; the interrupt is still pending
        assert!(hw.step());
        assert!(hw.step());
        assert!(!hw.is_busy());

        assert_eq!(engine.cancel_all(&hw), 0);
        let completion = engine.take_result().unwrap();
        assert_eq!(completion.transferred, 1);
        assert_eq!(completion.data(), &[0x5A]);
        assert_eq!(completion.result, Ok(()));
        assert!(engine.is_idle());
    }

    #[test]
    fn test_abandon_after_bus_finished_write_reports_success() {
        let (hw, mut engine) = setup();
        let id = engine
            .submit(&hw, request(Direction::Write, leak(2), Mode::Blocking))
            .unwrap();
        // Let the write finish without servicing its interrupt
        while hw.step() {}
        assert_eq!(hw.data(PEER), vec![0, 0]);

        let record = engine.abandon(&hw, id).unwrap();
        assert_eq!(record.transferred, 2);
        assert_eq!(record.result, Ok(()));
        assert!(engine.is_idle());
        assert!(engine.abandon(&hw, id).is_none());
    }

    #[test]
    fn test_cancel_after_address_nack_is_not_success() {
        let (hw, mut engine) = setup();
        hw.detach(PEER);
        engine
            .submit(&hw, request(Direction::Write, leak(0), Mode::Async(Notify::Mailbox)))
            .unwrap();
        assert!(hw.step());
        assert!(!hw.is_busy());

        assert_eq!(engine.cancel_all(&hw), 1);
        let completion = engine.take_result().unwrap();
        assert_eq!(completion.transferred, 0);
        assert_eq!(completion.result, Err(ScbmError::Cancelled));
    }

    #[test]
    fn test_cancel_with_bytes_outstanding_is_cancelled() {
        let (hw, mut engine) = setup();
        engine
            .submit(&hw, request(Direction::Write, leak(3), Mode::Async(Notify::Mailbox)))
            .unwrap();
        // Address phase plus two of three bytes
        for _ in 0..3 {
            assert!(hw.step());
        }

        assert_eq!(engine.cancel_all(&hw), 1);
        let completion = engine.take_result().unwrap();
        assert_eq!(completion.transferred, 2);
        assert_eq!(completion.result, Err(ScbmError::Cancelled));
    }
}
