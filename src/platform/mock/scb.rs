//! Simulated SCB master controller for testing
//!
//! `MockScb` models the controller at the register level: an address phase,
//! 8-byte write and read FIFOs, level-triggered FIFO interrupts and latched
//! fault interrupts. Bus progress is explicit: every [`MockScb::step`] clocks
//! at most one address or data byte, so tests decide when the bus moves.
//!
//! Peers are loopback devices: a write replaces the peer's data and a read
//! returns it, padded with `0xFF` once it runs out.

use crate::core::traits::{CriticalState, SharedState};
use crate::platform::traits::{FillFlags, IrqFlags, ScbHardware};
use crate::scbm::settings::Direction;
use crate::scbm::timing::TimingConfig;
use std::collections::VecDeque;
use std::vec::Vec;

/// Depth of both FIFOs
pub const FIFO_DEPTH: usize = 8;

/// Write FIFO level at or below which `WRITE_ALMOST_EMPTY` is raised
const WRITE_THRESHOLD: usize = 2;

/// Read FIFO level at or above which `READ_ALMOST_FULL` is raised
const READ_THRESHOLD: usize = 6;

/// Bus transaction type for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusTransaction {
    /// Write that ran to its programmed count
    Write { addr: u16, data: Vec<u8> },
    /// Read that ran to its programmed count
    Read { addr: u16, data: Vec<u8> },
    /// No peer answered the address
    AddressNack { addr: u16 },
    /// Peer rejected the data byte after `data`
    DataNack { addr: u16, data: Vec<u8> },
    /// Peer vanished mid-transfer
    Disconnected { addr: u16, data: Vec<u8> },
    /// Transaction stopped by the master
    Aborted { addr: u16, data: Vec<u8> },
}

#[derive(Debug)]
struct Peer {
    addr: u16,
    data: Vec<u8>,
    nack_at: Option<usize>,
    disconnect_after: Option<usize>,
}

#[derive(Debug)]
struct Op {
    direction: Direction,
    addr: u16,
    count: usize,
    addressed: bool,
    clocked: Vec<u8>,
}

#[derive(Debug)]
struct State {
    mask: IrqFlags,
    latched: IrqFlags,
    timing: Option<TimingConfig>,
    released: bool,
    op: Option<Op>,
    tx: VecDeque<u8>,
    rx: VecDeque<u8>,
    peers: Vec<Peer>,
    stall_budget: Option<usize>,
    log: Vec<BusTransaction>,
}

impl State {
    fn new() -> Self {
        Self {
            mask: IrqFlags::empty(),
            latched: IrqFlags::empty(),
            timing: None,
            released: false,
            op: None,
            tx: VecDeque::new(),
            rx: VecDeque::new(),
            peers: Vec::new(),
            stall_budget: None,
            log: Vec::new(),
        }
    }

    fn peer(&self, addr: u16) -> Option<&Peer> {
        self.peers.iter().find(|p| p.addr == addr)
    }

    fn peer_mut(&mut self, addr: u16) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|p| p.addr == addr)
    }

    fn level_flags(&self) -> IrqFlags {
        let mut flags = IrqFlags::empty();
        if self.rx.len() >= FIFO_DEPTH {
            flags |= IrqFlags::READ_FULL;
        }
        if self.rx.len() >= READ_THRESHOLD || (self.op.is_none() && !self.rx.is_empty()) {
            flags |= IrqFlags::READ_ALMOST_FULL;
        }
        if self.write_drained() {
            flags |= IrqFlags::WRITE_EMPTY;
        }
        if self.tx.len() <= WRITE_THRESHOLD {
            flags |= IrqFlags::WRITE_ALMOST_EMPTY;
        }
        flags
    }

    fn write_drained(&self) -> bool {
        self.tx.is_empty() && self.op.is_none()
    }

    /// Finish the current op, logging it as `entry`
    fn end_op(&mut self, latch: IrqFlags, entry: fn(u16, Vec<u8>) -> BusTransaction) {
        if let Some(op) = self.op.take() {
            self.log.push(entry(op.addr, op.clocked));
        }
        self.latched |= latch;
    }

    fn step(&mut self) -> bool {
        let Some(op) = self.op.as_ref() else {
            return false;
        };
        if self.stall_budget == Some(0) {
            return false;
        }
        let (addr, direction, count) = (op.addr, op.direction, op.count);

        if !op.addressed {
            if self.peer(addr).is_none() {
                self.op = None;
                self.log.push(BusTransaction::AddressNack { addr });
                self.latched |= IrqFlags::ADDRESS_NACK;
                return true;
            }
            if let Some(op) = self.op.as_mut() {
                op.addressed = true;
            }
            if count == 0 {
                self.end_op(IrqFlags::BUS_INACTIVE, |addr, data| BusTransaction::Write { addr, data });
            }
            return true;
        }

        let index = self.op.as_ref().map_or(0, |op| op.clocked.len());
        let byte = match direction {
            Direction::Write => {
                let Some(&byte) = self.tx.front() else {
                    // Clock stretched until the master refills
                    return false;
                };
                if self.peer(addr).and_then(|p| p.nack_at) == Some(index) {
                    self.end_op(IrqFlags::WRITE_NACK, |addr, data| BusTransaction::DataNack { addr, data });
                    return true;
                }
                self.tx.pop_front();
                if let Some(peer) = self.peer_mut(addr) {
                    if index == 0 {
                        peer.data.clear();
                    }
                    peer.data.push(byte);
                }
                byte
            }
            Direction::Read => {
                if self.rx.len() >= FIFO_DEPTH {
                    return false;
                }
                let byte = self
                    .peer(addr)
                    .and_then(|p| p.data.get(index).copied())
                    .unwrap_or(0xFF);
                self.rx.push_back(byte);
                byte
            }
        };

        if let Some(op) = self.op.as_mut() {
            op.clocked.push(byte);
        }
        if let Some(budget) = self.stall_budget.as_mut() {
            *budget -= 1;
        }

        let clocked = index + 1;
        let vanished = self.peer(addr).and_then(|p| p.disconnect_after) == Some(clocked);
        if vanished && clocked < count {
            self.peers.retain(|p| p.addr != addr);
            self.end_op(IrqFlags::BUS_INACTIVE, |addr, data| BusTransaction::Disconnected { addr, data });
        } else if clocked == count {
            match direction {
                Direction::Write => {
                    self.end_op(IrqFlags::BUS_INACTIVE, |addr, data| BusTransaction::Write { addr, data })
                }
                Direction::Read => {
                    self.end_op(IrqFlags::BUS_INACTIVE, |addr, data| BusTransaction::Read { addr, data })
                }
            }
        }
        true
    }
}

/// Simulated SCB master controller
pub struct MockScb {
    state: CriticalState<State>,
}

impl Default for MockScb {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScb {
    /// Create a controller with no peers on the bus
    pub fn new() -> Self {
        Self {
            state: CriticalState::new(State::new()),
        }
    }

    /// Put a loopback peer on the bus at `addr`
    pub fn attach(&self, addr: u16) {
        self.state.with_mut(|s| {
            if s.peer_mut(addr).is_none() {
                s.peers.push(Peer {
                    addr,
                    data: Vec::new(),
                    nack_at: None,
                    disconnect_after: None,
                });
            }
        });
    }

    /// Remove the peer at `addr`
    pub fn detach(&self, addr: u16) {
        self.state.with_mut(|s| s.peers.retain(|p| p.addr != addr));
    }

    pub fn is_attached(&self, addr: u16) -> bool {
        self.state.with(|s| s.peer(addr).is_some())
    }

    /// Replace the data the peer at `addr` serves to reads
    pub fn set_data(&self, addr: u16, data: &[u8]) {
        self.state.with_mut(|s| {
            if let Some(peer) = s.peer_mut(addr) {
                peer.data = data.to_vec();
            }
        });
    }

    /// Data currently held by the peer at `addr`
    pub fn data(&self, addr: u16) -> Vec<u8> {
        self.state
            .with(|s| s.peer(addr).map(|p| p.data.clone()).unwrap_or_default())
    }

    /// Make the peer at `addr` reject data byte `index` of every write
    pub fn nack_data_at(&self, addr: u16, index: usize) {
        self.state.with_mut(|s| {
            if let Some(peer) = s.peer_mut(addr) {
                peer.nack_at = Some(index);
            }
        });
    }

    /// Make the peer at `addr` vanish after `bytes` data bytes
    pub fn disconnect_after(&self, addr: u16, bytes: usize) {
        self.state.with_mut(|s| {
            if let Some(peer) = s.peer_mut(addr) {
                peer.disconnect_after = Some(bytes);
            }
        });
    }

    /// Stretch the clock indefinitely after `bytes` more data bytes
    pub fn stall_after(&self, bytes: usize) {
        self.state.with_mut(|s| s.stall_budget = Some(bytes));
    }

    /// Release a stalled bus
    pub fn resume(&self) {
        self.state.with_mut(|s| s.stall_budget = None);
    }

    /// Latch fault interrupts, as if the bus had produced them
    pub fn raise(&self, flags: IrqFlags) {
        self.state.with_mut(|s| s.latched |= flags);
    }

    /// Clock one address or data byte; returns whether the bus moved
    pub fn step(&self) -> bool {
        self.state.with_mut(|s| s.step())
    }

    /// Whether an enabled interrupt condition is asserted
    pub fn irq_pending(&self) -> bool {
        self.state
            .with(|s| (s.latched | s.level_flags()).intersects(s.mask))
    }

    /// Whether a transaction is programmed and not yet finished
    pub fn is_busy(&self) -> bool {
        self.state.with(|s| s.op.is_some())
    }

    /// Get transaction log (for test verification)
    pub fn transactions(&self) -> Vec<BusTransaction> {
        self.state.with(|s| s.log.clone())
    }

    /// Clear transaction log
    pub fn clear_transactions(&self) {
        self.state.with_mut(|s| s.log.clear());
    }

    /// Timing last programmed by `configure`
    pub fn timing(&self) -> Option<TimingConfig> {
        self.state.with(|s| s.timing)
    }

    pub fn is_released(&self) -> bool {
        self.state.with(|s| s.released)
    }
}

impl ScbHardware for MockScb {
    fn configure(&self, timing: &TimingConfig) {
        self.state.with_mut(|s| {
            s.timing = Some(*timing);
            s.released = false;
        });
    }

    fn release(&self) {
        self.state.with_mut(|s| {
            s.mask = IrqFlags::empty();
            s.latched = IrqFlags::empty();
            s.op = None;
            s.tx.clear();
            s.rx.clear();
            s.released = true;
        });
    }

    fn interrupt_status(&self) -> IrqFlags {
        self.state.with(|s| s.latched | s.level_flags())
    }

    fn interrupt_mask(&self) -> IrqFlags {
        self.state.with(|s| s.mask)
    }

    fn set_interrupt_mask(&self, mask: IrqFlags) {
        self.state.with_mut(|s| s.mask = mask);
    }

    fn clear_interrupts(&self, flags: IrqFlags) {
        self.state.with_mut(|s| s.latched.remove(flags));
    }

    fn fill_status(&self) -> FillFlags {
        self.state.with(|s| {
            let mut flags = FillFlags::empty();
            if s.tx.len() >= FIFO_DEPTH {
                flags |= FillFlags::WRITE_FULL;
            }
            if s.write_drained() {
                flags |= FillFlags::WRITE_EMPTY;
            }
            if s.rx.is_empty() {
                flags |= FillFlags::READ_EMPTY;
            }
            if s.rx.len() >= FIFO_DEPTH {
                flags |= FillFlags::READ_FULL;
            }
            flags
        })
    }

    fn write_level(&self) -> usize {
        self.state.with(|s| s.tx.len())
    }

    fn start_write(&self, address: u16, count: usize) {
        self.start(Direction::Write, address, count);
    }

    fn start_read(&self, address: u16, count: usize) {
        self.start(Direction::Read, address, count);
    }

    fn push_byte(&self, byte: u8) {
        self.state.with_mut(|s| {
            assert!(s.tx.len() < FIFO_DEPTH, "push into full write FIFO");
            s.tx.push_back(byte);
        });
    }

    fn pop_byte(&self) -> u8 {
        self.state.with_mut(|s| {
            assert!(!s.rx.is_empty(), "pop from empty read FIFO");
            s.rx.pop_front().unwrap_or(0xFF)
        })
    }

    fn abort(&self) {
        self.state.with_mut(|s| {
            if let Some(op) = s.op.take() {
                s.log.push(BusTransaction::Aborted {
                    addr: op.addr,
                    data: op.clocked,
                });
            }
            s.tx.clear();
            s.rx.clear();
        });
    }
}

impl MockScb {
    fn start(&self, direction: Direction, addr: u16, count: usize) {
        self.state.with_mut(|s| {
            assert!(s.op.is_none(), "transaction started while busy");
            assert!(!s.released, "transaction started on a released block");
            s.op = Some(Op {
                direction,
                addr,
                count,
                addressed: false,
                clocked: Vec::new(),
            });
        });
    }
}
