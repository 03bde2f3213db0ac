//! Error types for user-level fork.
//!
//! Two layers: [`SyscallError`] is what a single kernel call returns, and
//! [`Fatal`] is the one unrecoverable outcome of fork, page duplication, or
//! fault repair. A `Fatal` is never retried; whoever owns the environment
//! (the kernel on an upcall, or a test harness) turns it into termination.

use core::fmt;

use crate::{HumanAddress, VirtualAddress, fault::FaultRecord};

/// Error codes returned by the exokernel's system calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// Environment does not exist or the caller may not act on it.
    BadEnv,
    /// Invalid argument: unaligned or out-of-range address, bad permissions.
    Invalid,
    /// No physical memory left for a page or page table.
    NoMemory,
    /// Environment table is full.
    NoFreeEnv,
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadEnv => write!(f, "bad environment"),
            Self::Invalid => write!(f, "invalid parameter"),
            Self::NoMemory => write!(f, "out of memory"),
            Self::NoFreeEnv => write!(f, "out of environments"),
        }
    }
}

/// The kernel call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    CreateChild,
    AllocatePage,
    MapPage,
    UnmapPage,
    SetFaultUpcall,
    SetRunnable,
    EnvInfo,
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateChild => "create_child",
            Self::AllocatePage => "allocate_page",
            Self::MapPage => "map_page",
            Self::UnmapPage => "unmap_page",
            Self::SetFaultUpcall => "set_fault_upcall",
            Self::SetRunnable => "set_runnable",
            Self::EnvInfo => "env_info",
        };
        f.write_str(name)
    }
}

/// Why an environment was terminated by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A page fault arrived and no upcall was registered.
    UnhandledFault(FaultRecord),
    /// The exception stack is missing or not privately writable.
    ExceptionStackUnusable(FaultRecord),
    /// The upcall returned without fixing the fault.
    FaultNotRepaired(FaultRecord),
    /// The upcall reported an unrecoverable condition.
    Fatal(Fatal),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnhandledFault(record) => write!(f, "unhandled page fault: {}", record),
            Self::ExceptionStackUnusable(record) => {
                write!(f, "exception stack unusable while delivering {}", record)
            }
            Self::FaultNotRepaired(record) => write!(f, "page fault not repaired: {}", record),
            Self::Fatal(fatal) => write!(f, "{}", fatal),
        }
    }
}

/// Failure of a user-mode memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The access faulted and the environment did not survive it.
    Terminated(Termination),
    /// No environment is currently running.
    NoCurrentEnv,
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated(reason) => write!(f, "environment terminated: {}", reason),
            Self::NoCurrentEnv => write!(f, "no current environment"),
        }
    }
}

/// What went wrong in a [`Fatal`] condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The fault handler was entered for something other than a write.
    NotWriteFault,
    /// The fault handler was entered for a page that is not copy-on-write.
    NotCowPage,
    /// Page duplication was asked to touch a page at or above the stack top.
    OutsideForkRange,
    /// A kernel call failed.
    Syscall { call: Syscall, error: SyscallError },
    /// Copying the faulting page into the scratch slot failed.
    MemoryCopy,
    /// An alternate strategy that exists only as a named extension point.
    Unimplemented(&'static str),
}

/// An unrecoverable condition. The environment that hits one must terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fatal {
    kind: FatalKind,
    address: Option<VirtualAddress>,
}

impl Fatal {
    /// Creates a fatal condition with no associated address.
    pub const fn new(kind: FatalKind) -> Self {
        Self {
            kind,
            address: None,
        }
    }

    /// Creates a fatal condition tied to a virtual address.
    pub const fn at(kind: FatalKind, address: VirtualAddress) -> Self {
        Self {
            kind,
            address: Some(address),
        }
    }

    /// Creates a fatal condition for a failed kernel call on `address`.
    pub const fn syscall(call: Syscall, error: SyscallError, address: VirtualAddress) -> Self {
        Self::at(FatalKind::Syscall { call, error }, address)
    }

    /// Returns what went wrong.
    pub const fn kind(&self) -> FatalKind {
        self.kind
    }

    /// Returns the address the condition concerns, if any.
    pub const fn address(&self) -> Option<VirtualAddress> {
        self.address
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FatalKind::NotWriteFault => write!(f, "page fault was not caused by a write")?,
            FatalKind::NotCowPage => write!(f, "write fault on a page that is not copy-on-write")?,
            FatalKind::OutsideForkRange => write!(f, "page is outside the replicated range")?,
            FatalKind::Syscall { call, error } => write!(f, "{} failed: {}", call, error)?,
            FatalKind::MemoryCopy => write!(f, "copying the faulting page failed")?,
            FatalKind::Unimplemented(what) => write!(f, "{} not implemented", what)?,
        }
        if let Some(address) = self.address {
            write!(f, " at {}", HumanAddress::from(address))?;
        }
        Ok(())
    }
}

impl core::error::Error for SyscallError {}
impl core::error::Error for Termination {}
impl core::error::Error for AccessError {}
impl core::error::Error for Fatal {}

/// Convenience result type for fork operations.
pub type FatalResult<T = ()> = Result<T, Fatal>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_display_includes_call_and_address() {
        let fatal = Fatal::syscall(
            Syscall::MapPage,
            SyscallError::NoMemory,
            VirtualAddress::new(0x80_0000),
        );
        assert_eq!(format!("{}", fatal), "map_page failed: out of memory at 0x80_0000");
    }

    #[test]
    fn fatal_without_address() {
        let fatal = Fatal::new(FatalKind::Unimplemented("sfork"));
        assert_eq!(format!("{}", fatal), "sfork not implemented");
        assert_eq!(fatal.address(), None);
    }

    #[test]
    fn termination_wraps_fatal() {
        let fatal = Fatal::at(FatalKind::NotCowPage, VirtualAddress::new(0x1000));
        let access = AccessError::Terminated(Termination::Fatal(fatal));
        assert_eq!(
            format!("{}", access),
            "environment terminated: write fault on a page that is not copy-on-write at 0x1000"
        );
    }
}
