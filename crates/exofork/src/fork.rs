//! User-level fork.
//!
//! The parent does all the work: it creates an empty child, shares every
//! present user page below the normal stack top with it copy-on-write, gives
//! the child its own exception stack and fault upcall, and finally lets it run.
//! Writes on either side later fault into [`pgfault`], which hands the writer
//! a private copy.

use crate::{
    EnvId, HumanAddress, PageFlags, ThisEnv, VirtualAddress,
    duppage::duppage,
    error::{Fatal, FatalKind, FatalResult, Syscall},
    fault::pgfault,
    inspect::PermissionInspector,
    layout::{PAGE_SIZE, PT_SIZE, USTACKTOP, UXSTACK_BOTTOM},
    syscall::{Exokernel, ForkOutcome, Platform, Upcall},
};

/// How a child's address space relates to its parent's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Private copy-on-write copies of every page.
    #[default]
    CopyOnWrite,
    /// Memory shared with the parent, only the stack copy-on-write.
    ///
    /// Not implemented; requesting it is always fatal.
    Shared,
}

/// Installs `handler` as the calling environment's page-fault upcall.
///
/// The first call allocates the exception stack at
/// [`UXSTACK_BOTTOM`](crate::layout::UXSTACK_BOTTOM); later calls only
/// re-register the upcall.
pub fn set_pgfault_handler<K: Exokernel>(
    kernel: &mut K,
    this: &mut ThisEnv,
    handler: Upcall<K>,
) -> FatalResult {
    let me = kernel.current_process_id();
    let xstack = VirtualAddress::new(UXSTACK_BOTTOM);

    if !this.exception_stack_ready() {
        kernel
            .allocate_page(me, xstack, PageFlags::USER_RW)
            .map_err(|e| Fatal::syscall(Syscall::AllocatePage, e, xstack))?;
        this.mark_exception_stack_ready();
    }

    kernel
        .set_fault_upcall(me, handler)
        .map_err(|e| Fatal::syscall(Syscall::SetFaultUpcall, e, xstack))
}

/// Forks the calling environment with copy-on-write sharing.
pub fn fork<K: Platform>(kernel: &mut K, this: &mut ThisEnv) -> FatalResult<ForkOutcome> {
    fork_with(kernel, this, Strategy::CopyOnWrite)
}

/// Forks with shared memory. Always fatal.
pub fn sfork<K: Platform>(kernel: &mut K, this: &mut ThisEnv) -> FatalResult<ForkOutcome> {
    fork_with(kernel, this, Strategy::Shared)
}

/// Forks the calling environment using `strategy`.
pub fn fork_with<K: Platform>(
    kernel: &mut K,
    this: &mut ThisEnv,
    strategy: Strategy,
) -> FatalResult<ForkOutcome> {
    match strategy {
        Strategy::CopyOnWrite => cow_fork(kernel, this),
        Strategy::Shared => Err(Fatal::new(FatalKind::Unimplemented("sfork"))),
    }
}

fn cow_fork<K: Platform>(kernel: &mut K, this: &mut ThisEnv) -> FatalResult<ForkOutcome> {
    set_pgfault_handler(kernel, this, pgfault::<K>)?;

    let child = match kernel.create_child() {
        Ok(ForkOutcome::Parent(child)) => child,
        Ok(ForkOutcome::Child) => {
            let me = kernel.current_process_id();
            let info = kernel
                .env_info(me)
                .map_err(|e| Fatal::new(FatalKind::Syscall { call: Syscall::EnvInfo, error: e }))?;
            this.refresh(info);
            log::debug!("[{}] running as child of {:?}", me, info.parent);
            return Ok(ForkOutcome::Child);
        }
        Err(e) => {
            return Err(Fatal::new(FatalKind::Syscall {
                call: Syscall::CreateChild,
                error: e,
            }));
        }
    };

    log::debug!("[{}] fork: created child {}", this.id(), child);

    let shared = replicate_address_space(kernel, child)?;

    let xstack = VirtualAddress::new(UXSTACK_BOTTOM);
    kernel
        .allocate_page(child, xstack, PageFlags::USER_RW)
        .map_err(|e| Fatal::syscall(Syscall::AllocatePage, e, xstack))?;
    kernel
        .set_fault_upcall(child, pgfault::<K>)
        .map_err(|e| Fatal::syscall(Syscall::SetFaultUpcall, e, xstack))?;
    kernel
        .set_runnable(child)
        .map_err(|e| Fatal::new(FatalKind::Syscall { call: Syscall::SetRunnable, error: e }))?;

    log::debug!(
        "[{}] fork: child {} runnable, {} pages shared",
        this.id(),
        child,
        shared
    );
    Ok(ForkOutcome::Parent(child))
}

/// Duplicates every present user page below [`USTACKTOP`] into `child`.
///
/// Returns the number of pages duplicated.
fn replicate_address_space<K: Platform>(kernel: &mut K, child: EnvId) -> FatalResult<usize> {
    let mut shared = 0;
    let mut addr = 0;

    while addr < USTACKTOP {
        let va = VirtualAddress::new(addr);
        if !kernel.is_table_present(va) {
            addr = va.align_down(PT_SIZE).as_usize() + PT_SIZE;
            continue;
        }

        let page = va.page();
        if kernel.is_present(page) && kernel.is_user(page) {
            duppage(kernel, child, page)?;
            shared += 1;
        }
        addr += PAGE_SIZE;
    }

    log::trace!(
        "replicated {} pages below {}",
        shared,
        HumanAddress::from(USTACKTOP)
    );
    Ok(shared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        EnvStatus, Termination,
        emulation::{EmulatedKernel, EmulatorConfig},
        layout::{PFTEMP, UTEXT},
        syscall::UserMemory,
    };

    const X: usize = UTEXT;

    fn setup_with(config: EmulatorConfig) -> (EmulatedKernel, ThisEnv) {
        let mut kernel = EmulatedKernel::new(config);
        let root = kernel.spawn().unwrap();
        kernel.run(root).unwrap();
        let this = ThisEnv::new(kernel.env_info(root).unwrap());
        (kernel, this)
    }

    fn setup() -> (EmulatedKernel, ThisEnv) {
        setup_with(EmulatorConfig::default())
    }

    fn va(addr: usize) -> VirtualAddress {
        VirtualAddress::new(addr)
    }

    /// Maps a writable page at `X` holding "hello".
    fn map_hello(kernel: &mut EmulatedKernel, env: EnvId) {
        kernel.allocate_page(env, va(X), PageFlags::USER_RW).unwrap();
        kernel.store(va(X), b"hello").unwrap();
    }

    fn fork_parent(kernel: &mut EmulatedKernel, this: &mut ThisEnv) -> EnvId {
        match fork(kernel, this).unwrap() {
            ForkOutcome::Parent(child) => child,
            ForkOutcome::Child => panic!("parent saw the child side of fork"),
        }
    }

    /// Switches to `child` and finishes its side of fork.
    fn enter_child(kernel: &mut EmulatedKernel, parent_this: &ThisEnv, child: EnvId) -> ThisEnv {
        kernel.run(child).unwrap();
        let mut this = parent_this.clone();
        assert_eq!(fork(kernel, &mut this).unwrap(), ForkOutcome::Child);
        this
    }

    #[test]
    fn shared_page_reads_the_same_in_both() {
        let (mut kernel, mut this) = setup();
        let parent = this.id();
        map_hello(&mut kernel, parent);

        let child = fork_parent(&mut kernel, &mut this);

        let (parent_frame, parent_flags) = kernel.mapping(parent, va(X)).unwrap();
        let (child_frame, child_flags) = kernel.mapping(child, va(X)).unwrap();
        assert_eq!(parent_frame, child_frame);
        assert_eq!(parent_flags, PageFlags::USER_COW);
        assert_eq!(child_flags, PageFlags::USER_COW);
        assert_eq!(kernel.peek(child, va(X), 5).unwrap(), b"hello");

        let mut buf = [0u8; 5];
        kernel.load(va(X), &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(kernel.env_info(child).unwrap().status, EnvStatus::Runnable);
        assert!(kernel.check_exclusive_writable().is_ok());
    }

    #[test]
    fn child_write_gets_private_copy() {
        let (mut kernel, mut this) = setup();
        let parent = this.id();
        map_hello(&mut kernel, parent);
        let child = fork_parent(&mut kernel, &mut this);

        let child_this = enter_child(&mut kernel, &this, child);
        assert_eq!(child_this.id(), child);
        assert_eq!(child_this.info().parent, Some(parent));

        kernel.store(va(X), b"HELLO").unwrap();

        assert_eq!(kernel.peek(child, va(X), 5).unwrap(), b"HELLO");
        assert_eq!(kernel.peek(parent, va(X), 5).unwrap(), b"hello");
        assert_eq!(kernel.mapping(child, va(X)).unwrap().1, PageFlags::USER_RW);
        assert_eq!(kernel.mapping(parent, va(X)).unwrap().1, PageFlags::USER_COW);
        assert!(kernel.mapping(child, va(PFTEMP)).is_none());
        assert!(kernel.termination(child).is_none());
        assert!(kernel.check_exclusive_writable().is_ok());
    }

    #[test]
    fn parent_write_leaves_child_untouched() {
        let (mut kernel, mut this) = setup();
        let parent = this.id();
        map_hello(&mut kernel, parent);
        let child = fork_parent(&mut kernel, &mut this);

        kernel.store(va(X + 1), b"ELLO").unwrap();

        assert_eq!(kernel.peek(parent, va(X), 5).unwrap(), b"hELLO");
        assert_eq!(kernel.peek(child, va(X), 5).unwrap(), b"hello");
        assert_eq!(kernel.mapping(child, va(X)).unwrap().1, PageFlags::USER_COW);
        assert!(kernel.check_exclusive_writable().is_ok());
    }

    #[test]
    fn child_gets_private_exception_stack() {
        let (mut kernel, mut this) = setup();
        let parent = this.id();
        let child = fork_parent(&mut kernel, &mut this);
        let xstack = va(UXSTACK_BOTTOM);

        let (parent_frame, parent_flags) = kernel.mapping(parent, xstack).unwrap();
        let (child_frame, child_flags) = kernel.mapping(child, xstack).unwrap();
        assert_eq!(parent_flags, PageFlags::USER_RW);
        assert_eq!(child_flags, PageFlags::USER_RW);
        assert_ne!(parent_frame, child_frame);
        assert!(
            kernel
                .user_mappings(parent)
                .iter()
                .all(|&(_, frame, _)| frame != child_frame)
        );
    }

    #[test]
    fn read_only_pages_are_shared_without_cow() {
        let (mut kernel, mut this) = setup();
        let parent = this.id();
        kernel.allocate_page(parent, va(X), PageFlags::USER_RO).unwrap();

        let child = fork_parent(&mut kernel, &mut this);

        assert_eq!(kernel.mapping(parent, va(X)).unwrap().1, PageFlags::USER_RO);
        assert_eq!(kernel.mapping(child, va(X)).unwrap().1, PageFlags::USER_RO);
    }

    #[test]
    fn every_page_below_stack_top_is_replicated() {
        let (mut kernel, mut this) = setup();
        let parent = this.id();
        let pages = [
            UTEXT,
            UTEXT + PAGE_SIZE,
            UTEXT + 7 * PT_SIZE,
            USTACKTOP - PAGE_SIZE,
        ];
        for &page in &pages {
            kernel.allocate_page(parent, va(page), PageFlags::USER_RW).unwrap();
        }

        let child = fork_parent(&mut kernel, &mut this);

        for &page in &pages {
            assert_eq!(
                kernel.mapping(child, va(page)),
                kernel.mapping(parent, va(page)),
                "page {:#x}",
                page
            );
        }
        // Only the exception stack sits above the fork boundary.
        let above: Vec<_> = kernel
            .user_mappings(child)
            .into_iter()
            .filter(|&(addr, _, _)| addr.as_usize() >= USTACKTOP)
            .collect();
        assert_eq!(above.len(), 1);
        assert_eq!(above[0].0, va(UXSTACK_BOTTOM));
    }

    #[test]
    fn handler_registration_is_idempotent() {
        let (mut kernel, mut this) = setup();
        set_pgfault_handler(&mut kernel, &mut this, pgfault).unwrap();
        let first = kernel.mapping(this.id(), va(UXSTACK_BOTTOM)).unwrap();
        set_pgfault_handler(&mut kernel, &mut this, pgfault).unwrap();
        assert_eq!(kernel.mapping(this.id(), va(UXSTACK_BOTTOM)).unwrap(), first);
    }

    #[test]
    fn grandchildren_keep_writable_frames_exclusive() {
        let (mut kernel, mut this) = setup();
        let parent = this.id();
        map_hello(&mut kernel, parent);
        let child = fork_parent(&mut kernel, &mut this);
        assert!(kernel.check_exclusive_writable().is_ok());

        let mut child_this = enter_child(&mut kernel, &this, child);
        let grandchild = fork_parent(&mut kernel, &mut child_this);
        assert!(kernel.check_exclusive_writable().is_ok());

        kernel.store(va(X), b"child").unwrap();
        assert!(kernel.check_exclusive_writable().is_ok());

        let _ = enter_child(&mut kernel, &child_this, grandchild);
        kernel.store(va(X), b"grand").unwrap();
        assert!(kernel.check_exclusive_writable().is_ok());

        assert_eq!(kernel.peek(parent, va(X), 5).unwrap(), b"hello");
        assert_eq!(kernel.peek(child, va(X), 5).unwrap(), b"child");
        assert_eq!(kernel.peek(grandchild, va(X), 5).unwrap(), b"grand");
    }

    #[test]
    fn sfork_is_fatal_and_creates_nothing() {
        let (mut kernel, mut this) = setup();
        let before = kernel.live_envs();

        let fatal = sfork(&mut kernel, &mut this).unwrap_err();

        assert_eq!(fatal.kind(), FatalKind::Unimplemented("sfork"));
        assert_eq!(kernel.live_envs(), before);
    }

    #[test]
    fn out_of_memory_during_fork_is_fatal() {
        let (mut kernel, mut this) = setup_with(EmulatorConfig {
            frames: 6,
            ..EmulatorConfig::default()
        });
        map_hello(&mut kernel, this.id());

        let fatal = fork(&mut kernel, &mut this).unwrap_err();

        assert!(matches!(
            fatal.kind(),
            FatalKind::Syscall {
                error: crate::SyscallError::NoMemory,
                ..
            }
        ));
        assert!(
            kernel
                .children_of(this.id())
                .iter()
                .all(|&child| kernel.env_info(child).unwrap().status == EnvStatus::NotRunnable)
        );
    }

    #[test]
    fn environment_table_exhaustion_is_fatal() {
        let (mut kernel, mut this) = setup_with(EmulatorConfig {
            max_envs: 1,
            ..EmulatorConfig::default()
        });

        let fatal = fork(&mut kernel, &mut this).unwrap_err();
        assert_eq!(
            fatal.kind(),
            FatalKind::Syscall {
                call: Syscall::CreateChild,
                error: crate::SyscallError::NoFreeEnv,
            }
        );
    }

    #[test]
    fn fault_without_upcall_terminates() {
        let (mut kernel, this) = setup();
        let mut buf = [0u8; 1];
        let err = kernel.load(va(X), &mut buf).unwrap_err();
        assert!(matches!(
            err,
            crate::AccessError::Terminated(Termination::UnhandledFault(_))
        ));
        assert_eq!(kernel.env_info(this.id()).unwrap().status, EnvStatus::Dying);
    }
}
