//! Environment (process) identities and the per-process self context.

use core::fmt;

/// Identifier of an environment: a schedulable context plus its address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EnvId(u32);

impl EnvId {
    /// Creates an environment identifier from its raw value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Scheduling state of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    /// Slot is unused.
    Free,
    /// Destroyed, waiting to be reaped.
    Dying,
    /// May be picked by the scheduler.
    Runnable,
    /// Currently executing.
    Running,
    /// Exists but must not be scheduled (e.g. a half-built child).
    NotRunnable,
}

/// Read-only metadata the kernel exposes about an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    pub id: EnvId,
    pub parent: Option<EnvId>,
    pub status: EnvStatus,
}

/// A process's view of itself.
///
/// Each environment holds one of these in its own memory. After a fork the
/// child starts with a byte-for-byte copy of its parent's, so the child must
/// refresh it (see [`ThisEnv::refresh`]) before trusting [`ThisEnv::id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThisEnv {
    info: EnvInfo,
    exception_stack_ready: bool,
}

impl ThisEnv {
    /// Creates the self context from the kernel's metadata for this environment.
    pub fn new(info: EnvInfo) -> Self {
        Self {
            info,
            exception_stack_ready: false,
        }
    }

    /// Returns the cached identifier of this environment.
    pub fn id(&self) -> EnvId {
        self.info.id
    }

    /// Returns the cached metadata of this environment.
    pub fn info(&self) -> &EnvInfo {
        &self.info
    }

    /// Replaces the cached metadata, e.g. in a freshly forked child.
    pub fn refresh(&mut self, info: EnvInfo) {
        self.info = info;
    }

    /// Returns true once this environment has allocated its exception stack.
    pub fn exception_stack_ready(&self) -> bool {
        self.exception_stack_ready
    }

    pub(crate) fn mark_exception_stack_ready(&mut self) {
        self.exception_stack_ready = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u32, parent: Option<u32>) -> EnvInfo {
        EnvInfo {
            id: EnvId::new(id),
            parent: parent.map(EnvId::new),
            status: EnvStatus::Running,
        }
    }

    #[test]
    fn refresh_replaces_identity() {
        let mut this = ThisEnv::new(info(0x1000, None));
        this.mark_exception_stack_ready();

        let mut child = this.clone();
        child.refresh(info(0x1001, Some(0x1000)));

        assert_eq!(child.id(), EnvId::new(0x1001));
        assert_eq!(child.info().parent, Some(EnvId::new(0x1000)));
        assert!(child.exception_stack_ready());
        assert_eq!(this.id(), EnvId::new(0x1000));
    }

    #[test]
    fn display_is_zero_padded_hex() {
        assert_eq!(format!("{}", EnvId::new(0x1001)), "00001001");
    }
}
