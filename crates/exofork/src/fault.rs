//! Copy-on-write page fault handling.
//!
//! [`pgfault`] is what fork registers as every process's fault upcall. It runs
//! on the process's private exception stack, so it may freely repair the page
//! that holds the normal stack.

use core::fmt;

use x86_64::structures::idt::PageFaultErrorCode;

use crate::{
    HumanAddress, PageFlags, VirtualAddress,
    error::{Fatal, FatalKind, FatalResult, Syscall},
    inspect::PermissionInspector,
    layout::{PAGE_SIZE, PFTEMP},
    syscall::Platform,
};

/// Fault information the kernel hands to the upcall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// The address whose access faulted.
    pub fault_va: VirtualAddress,
    /// Hardware error code describing the access.
    pub err: PageFaultErrorCode,
}

impl FaultRecord {
    /// Size of the record as pushed onto the exception stack.
    pub const ENCODED_SIZE: usize = 8;

    /// Builds the record for a user-mode access.
    pub fn user_access(fault_va: VirtualAddress, present: bool, write: bool) -> Self {
        let mut err = PageFaultErrorCode::USER_MODE;
        err.set(PageFaultErrorCode::PROTECTION_VIOLATION, present);
        err.set(PageFaultErrorCode::CAUSED_BY_WRITE, write);
        Self { fault_va, err }
    }

    /// Returns true if the faulting access was a write.
    pub fn is_write(&self) -> bool {
        self.err.contains(PageFaultErrorCode::CAUSED_BY_WRITE)
    }

    /// Returns true if the page was present (a protection fault).
    pub fn is_protection_violation(&self) -> bool {
        self.err.contains(PageFaultErrorCode::PROTECTION_VIOLATION)
    }

    /// Encodes the record as it sits on the exception stack: the 32-bit fault
    /// address followed by the 32-bit error code, both little-endian.
    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut bytes = [0u8; Self::ENCODED_SIZE];
        bytes[..4].copy_from_slice(&(self.fault_va.as_usize() as u32).to_le_bytes());
        bytes[4..].copy_from_slice(&(self.err.bits() as u32).to_le_bytes());
        bytes
    }
}

impl fmt::Display for FaultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = if self.is_write() { "write" } else { "read" };
        let cause = if self.is_protection_violation() {
            "protection"
        } else {
            "not-present"
        };
        write!(
            f,
            "{} {} fault at {}",
            cause,
            access,
            HumanAddress::from(self.fault_va)
        )
    }
}

/// Repairs a write fault on a copy-on-write page.
///
/// The faulting page is replaced by a private, writable copy staged at
/// [`PFTEMP`]. Anything other than a write to a COW page is fatal.
pub fn pgfault<K: Platform>(kernel: &mut K, record: &FaultRecord) -> FatalResult {
    let addr = record.fault_va;

    if !record.is_write() {
        return Err(Fatal::at(FatalKind::NotWriteFault, addr));
    }
    if !kernel.is_cow(addr.page()) {
        return Err(Fatal::at(FatalKind::NotCowPage, addr));
    }

    let env = kernel.current_process_id();
    let page = addr.page_start();
    let scratch = VirtualAddress::new(PFTEMP);

    kernel
        .allocate_page(env, scratch, PageFlags::USER_RW)
        .map_err(|e| Fatal::syscall(Syscall::AllocatePage, e, scratch))?;

    kernel
        .memmove(scratch, page, PAGE_SIZE)
        .map_err(|_| Fatal::at(FatalKind::MemoryCopy, page))?;

    kernel
        .unmap_page(env, page)
        .map_err(|e| Fatal::syscall(Syscall::UnmapPage, e, page))?;

    kernel
        .map_page(env, scratch, env, page, PageFlags::USER_RW)
        .map_err(|e| Fatal::syscall(Syscall::MapPage, e, page))?;

    kernel
        .unmap_page(env, scratch)
        .map_err(|e| Fatal::syscall(Syscall::UnmapPage, e, scratch))?;

    log::trace!("[{}] private copy of {}", env, HumanAddress::from(page));
    Ok(())
}
