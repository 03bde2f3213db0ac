#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # exofork
//!
//! User-level, copy-on-write `fork` for an exokernel. The kernel only offers
//! primitive page-mapping system calls and a page-fault upcall; everything
//! else lives here, in the process being forked:
//!
//! - Read-only inspection of the caller's own page tables.
//! - A copy-on-write page fault handler.
//! - Page duplication and the fork driver itself.
//! - A software-emulated exokernel for testing in non-kernel environments.

extern crate alloc;

mod address;
mod env;
mod flags;
mod human_address;
mod numbers;

pub mod duppage;
pub mod error;
pub mod fault;
pub mod fork;
pub mod inspect;
pub mod layout;
pub mod syscall;

#[cfg(any(test, feature = "software-emulation"))]
pub mod emulation;

pub use address::{PhysicalAddress, VirtualAddress};
pub use duppage::duppage;
pub use env::{EnvId, EnvInfo, EnvStatus, ThisEnv};
pub use error::{AccessError, Fatal, FatalKind, FatalResult, Syscall, SyscallError, Termination};
pub use fault::{FaultRecord, pgfault};
pub use flags::PageFlags;
pub use fork::{Strategy, fork, fork_with, set_pgfault_handler, sfork};
pub use human_address::HumanAddress;
pub use inspect::PermissionInspector;
pub use numbers::{FrameNumber, PageNumber};
pub use syscall::{Exokernel, ForkOutcome, PageTableView, Platform, Upcall, UserMemory};

pub use layout::PAGE_SIZE;
