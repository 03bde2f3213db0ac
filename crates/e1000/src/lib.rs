#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # e1000
//!
//! Transmit path for the Intel 8254x (E1000) gigabit network controller:
//! the descriptor ring the NIC reads packets from, device attach, and
//! non-blocking transmit. Register access goes through [`RegisterFile`] so the
//! same driver runs against real MMIO or a software register file.

extern crate alloc;

mod descriptor;
mod device;
mod error;
mod registers;
mod ring;

#[cfg(any(test, feature = "software-emulation"))]
pub mod emulation;

pub use descriptor::{TX_BUFFER_SIZE, TxCommand, TxDescriptor, TxStatus};
pub use device::E1000;
pub use error::TxError;
pub use registers::{Mmio, Register, RegisterFile, tctl, tipg};
pub use ring::{TDLEN_ALIGN, TxRing};
