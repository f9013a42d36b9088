//! Transaction slots
//!
//! A fixed arena of slots with a free list. Each queued or in-flight
//! transaction owns one slot from submission until its result has been
//! delivered. Slot handles carry a generation so a handle that outlived its
//! transaction can never touch the slot's next occupant.

use crate::platform::ScbmError;
use crate::scbm::settings::Direction;
use embassy_sync::waitqueue::WakerRegistration;
use heapless::Vec;

/// Handle to an occupied slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct SlotId {
    index: usize,
    generation: u32,
}

/// Caller buffer captured as a raw pointer for the duration of a transaction
///
/// The engine touches it only while the owning slot is queued or active.
/// Blocking callers guarantee this by abandoning the transaction before their
/// borrow ends; asynchronous callers hand over a `&'static mut` buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawBuf {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the pointee is only accessed under the device's critical section.
unsafe impl Send for RawBuf {}

impl RawBuf {
    pub(crate) fn from_mut(buf: &mut [u8]) -> Self {
        Self {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }

    /// Capture a buffer that will only ever be read from
    pub(crate) fn from_ref(buf: &[u8]) -> Self {
        Self {
            ptr: buf.as_ptr() as *mut u8,
            len: buf.len(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    ///
    /// The buffer must still be live and `index < len`.
    pub(crate) unsafe fn get(&self, index: usize) -> u8 {
        debug_assert!(index < self.len);
        *self.ptr.add(index)
    }

    /// # Safety
    ///
    /// The buffer must still be live, captured with [`RawBuf::from_mut`],
    /// and `index < len`.
    pub(crate) unsafe fn set(&self, index: usize, byte: u8) {
        debug_assert!(index < self.len);
        *self.ptr.add(index) = byte;
    }

    /// # Safety
    ///
    /// The buffer must have been captured from a `&'static mut [u8]` whose
    /// only other use was this capture.
    pub(crate) unsafe fn into_static(self) -> &'static mut [u8] {
        core::slice::from_raw_parts_mut(self.ptr, self.len)
    }
}

/// Outcome of an asynchronous transaction
#[derive(Debug)]
pub struct Completion {
    pub direction: Direction,
    pub address: u16,
    /// The submitted buffer, handed back; for reads it holds the data
    pub buffer: &'static mut [u8],
    /// Bytes moved on the bus
    pub transferred: usize,
    pub result: Result<(), ScbmError>,
}

impl Completion {
    /// The bytes that were actually transferred
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.transferred]
    }
}

/// How an asynchronous transaction reports its completion
#[derive(Debug, Clone, Copy)]
pub enum Notify {
    /// Invoke the callback (from interrupt context) with the completion
    Callback(fn(Completion)),
    /// Keep the completion until `Port::get_result` collects it
    Mailbox,
    /// Drop the result and free the slot as soon as it completes
    Discard,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Mode {
    /// A task is suspended on the slot's waker
    Blocking,
    Async(Notify),
}

/// One submitted transaction
#[derive(Debug, Clone, Copy)]
pub(crate) struct Request {
    pub direction: Direction,
    pub address: u16,
    pub buffer: RawBuf,
    pub mode: Mode,
}

/// Completion record written by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Record {
    pub transferred: usize,
    pub result: Result<(), ScbmError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Free,
    Pending,
    Done(Record),
}

struct Slot {
    generation: u32,
    state: State,
    request: Option<Request>,
    waker: WakerRegistration,
}

impl Slot {
    const fn new() -> Self {
        Self {
            generation: 0,
            state: State::Free,
            request: None,
            waker: WakerRegistration::new(),
        }
    }
}

/// Fixed-capacity slot arena
pub(crate) struct SlotPool<const N: usize> {
    slots: [Slot; N],
    free: Vec<usize, N>,
}

impl<const N: usize> SlotPool<N> {
    pub(crate) fn new() -> Self {
        let mut free = Vec::new();
        // Hand out low indices first
        for index in (0..N).rev() {
            let _ = free.push(index);
        }
        Self {
            slots: [const { Slot::new() }; N],
            free,
        }
    }

    /// Number of slots not currently occupied
    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.free.len()
    }

    /// Occupy a free slot, or `None` if the pool is exhausted
    pub(crate) fn alloc(&mut self, request: Request) -> Option<SlotId> {
        let index = self.free.pop()?;
        let slot = &mut self.slots[index];
        slot.state = State::Pending;
        slot.request = Some(request);
        Some(SlotId {
            index,
            generation: slot.generation,
        })
    }

    fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots
            .get(id.index)
            .filter(|s| s.generation == id.generation && s.state != State::Free)
    }

    fn slot_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index)
            .filter(|s| s.generation == id.generation && s.state != State::Free)
    }

    pub(crate) fn request(&self, id: SlotId) -> Option<Request> {
        self.slot(id).and_then(|s| s.request)
    }

    /// Completion record, if the transaction has finished
    pub(crate) fn record(&self, id: SlotId) -> Option<Record> {
        match self.slot(id)?.state {
            State::Done(record) => Some(record),
            _ => None,
        }
    }

    pub(crate) fn is_pending(&self, id: SlotId) -> bool {
        matches!(self.slot(id).map(|s| s.state), Some(State::Pending))
    }

    /// Write the completion record and wake a blocked owner
    ///
    /// A record is written at most once; later attempts are ignored.
    pub(crate) fn complete(&mut self, id: SlotId, record: Record) -> bool {
        match self.slot_mut(id) {
            Some(slot) if slot.state == State::Pending => {
                slot.state = State::Done(record);
                slot.waker.wake();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn register_waker(&mut self, id: SlotId, waker: &core::task::Waker) {
        if let Some(slot) = self.slot_mut(id) {
            slot.waker.register(waker);
        }
    }

    /// Return a slot to the free list, taking its request and record
    pub(crate) fn release(&mut self, id: SlotId) -> Option<(Request, Option<Record>)> {
        let slot = self.slot_mut(id)?;
        let record = match slot.state {
            State::Done(record) => Some(record),
            _ => None,
        };
        let request = slot.request.take()?;
        slot.state = State::Free;
        slot.generation = slot.generation.wrapping_add(1);
        // Capacity is N and every index is either free or occupied
        let _ = self.free.push(id.index);
        Some((request, record))
    }
}
