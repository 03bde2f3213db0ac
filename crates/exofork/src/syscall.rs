//! The exokernel surface user-level fork is written against.
//!
//! Three traits split the kernel's interface the way a user process sees it:
//! [`Exokernel`] for system calls, [`PageTableView`] for the read-only
//! self-mapped page table, and [`UserMemory`] for ordinary loads and stores
//! that may fault and be redirected to the registered upcall.

use crate::{
    EnvId, EnvInfo, PageFlags, PageNumber, VirtualAddress,
    error::{AccessError, FatalResult, SyscallError},
    fault::FaultRecord,
};

/// Entry point the kernel transfers control to on a user page fault.
///
/// The kernel passes itself back in so the handler can issue system calls.
pub type Upcall<K> = fn(&mut K, &FaultRecord) -> FatalResult;

/// Which side of a fork a caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// Running in the parent; carries the new child's identifier.
    Parent(EnvId),
    /// Running in the newly created child.
    Child,
}

/// System calls offered by the exokernel.
///
/// Every call that names an environment accepts either the caller itself or a
/// child the caller created.
pub trait Exokernel: Sized {
    /// Returns the identifier of the calling environment.
    fn current_process_id(&self) -> EnvId;

    /// Returns the kernel's read-only metadata for an environment.
    fn env_info(&self, env: EnvId) -> Result<EnvInfo, SyscallError>;

    /// Creates an empty, not-yet-runnable child.
    ///
    /// Returns [`ForkOutcome::Parent`] in the caller and [`ForkOutcome::Child`]
    /// when the child first runs.
    fn create_child(&mut self) -> Result<ForkOutcome, SyscallError>;

    /// Allocates a zeroed frame and maps it at `va` in `env`, replacing any
    /// existing mapping.
    fn allocate_page(
        &mut self,
        env: EnvId,
        va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SyscallError>;

    /// Maps the frame at `src_va` in `src_env` at `dst_va` in `dst_env`.
    fn map_page(
        &mut self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SyscallError>;

    /// Removes the mapping at `va` in `env`. Unmapping an empty slot succeeds.
    fn unmap_page(&mut self, env: EnvId, va: VirtualAddress) -> Result<(), SyscallError>;

    /// Registers the page-fault upcall of `env`.
    fn set_fault_upcall(&mut self, env: EnvId, upcall: Upcall<Self>) -> Result<(), SyscallError>;

    /// Marks `env` runnable.
    fn set_runnable(&mut self, env: EnvId) -> Result<(), SyscallError>;
}

/// Read-only view of the calling environment's own page tables.
pub trait PageTableView {
    /// Returns the page-directory entry covering `va`.
    fn directory_entry(&self, va: VirtualAddress) -> PageFlags;

    /// Returns the permission bits of the page-table entry for `page`.
    ///
    /// Empty when the covering page table does not exist.
    fn table_entry(&self, page: PageNumber) -> PageFlags;
}

/// User-mode memory accesses in the calling environment.
pub trait UserMemory {
    /// Reads `buf.len()` bytes starting at `va`.
    fn load(&mut self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), AccessError>;

    /// Writes `data` starting at `va`.
    fn store(&mut self, va: VirtualAddress, data: &[u8]) -> Result<(), AccessError>;

    /// Copies `len` bytes from `src` to `dst`; the ranges may overlap.
    fn memmove(
        &mut self,
        dst: VirtualAddress,
        src: VirtualAddress,
        len: usize,
    ) -> Result<(), AccessError>;
}

/// Everything fork and its fault handler need from the platform.
pub trait Platform: Exokernel + PageTableView + UserMemory {}

impl<T: Exokernel + PageTableView + UserMemory> Platform for T {}
