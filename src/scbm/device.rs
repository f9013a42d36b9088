//! SCBM device context
//!
//! One `ScbmDevice` exists per hardware block. It pairs the hardware handle
//! with the engine state and is the target of the block's interrupt vector.

use crate::core::traits::{CriticalState, SharedState};
use crate::platform::traits::ScbHardware;
use crate::scbm::engine::Engine;

/// Hardware block plus its transaction engine
///
/// `SLOTS` is the number of transactions that may be queued or in flight at
/// once on this block.
pub struct ScbmDevice<H, const SLOTS: usize = 8> {
    index: usize,
    hw: H,
    state: CriticalState<Engine<SLOTS>>,
}

impl<H: ScbHardware, const SLOTS: usize> ScbmDevice<H, SLOTS> {
    /// Create the device context for block `index`
    pub fn new(index: usize, hw: H) -> Self {
        const { assert!(SLOTS > 0, "SCBM needs at least one transaction slot") };
        Self {
            index,
            hw,
            state: CriticalState::new(Engine::new()),
        }
    }

    /// Interrupt entry point
    ///
    /// Call this from the block's interrupt handler. Finished callback
    /// transactions have their callbacks invoked before it returns.
    pub fn on_interrupt(&self) {
        self.state.with_mut(|engine| engine.service(&self.hw));
        self.dispatch();
    }

    /// Logical block index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Underlying hardware handle
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Whether a port currently owns this block
    pub fn is_claimed(&self) -> bool {
        self.state.with(|engine| engine.is_claimed())
    }

    /// Whether no transaction is active or queued
    pub fn is_idle(&self) -> bool {
        self.state.with(|engine| engine.is_idle())
    }

    /// Run `f` on the engine inside the critical section
    pub(crate) fn with_engine<R>(&self, f: impl FnOnce(&H, &mut Engine<SLOTS>) -> R) -> R {
        self.state.with_mut(|engine| f(&self.hw, engine))
    }

    /// Invoke callbacks of finished transactions, outside the critical section
    pub(crate) fn dispatch(&self) {
        while let Some((callback, completion)) = self.state.with_mut(|engine| engine.take_callback())
        {
            callback(completion);
        }
    }
}
