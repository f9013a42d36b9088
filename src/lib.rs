#![cfg_attr(not(any(test, feature = "mock")), no_std)]

//! scb_master - Serial Control Bus master transaction engine
//!
//! This library drives two-wire control bus master blocks: bit-rate timing
//! calculation, interrupt-driven FIFO servicing, blocking and asynchronous
//! transactions, cancellation and bus fault classification.

// Core infrastructure (logging, critical-section state)
pub mod core;

// Platform abstraction layer (hardware trait, errors, mock controller)
pub mod platform;

// Transaction engine
pub mod scbm;
