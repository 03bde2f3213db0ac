use crate::{
    EnvId, HumanAddress, PageFlags, PageNumber,
    error::{Fatal, FatalKind, FatalResult, Syscall},
    inspect::PermissionInspector,
    syscall::Platform,
};

/// Replicates the caller's mapping of `page` into `target`.
///
/// Writable and copy-on-write pages are shared copy-on-write. The target's
/// mapping is installed before the caller's own mapping is downgraded.
///
/// Read-only pages are shared read-only and never copied.
pub fn duppage<K: Platform>(kernel: &mut K, target: EnvId, page: PageNumber) -> FatalResult {
    let va = page.start();
    if !page.is_below_stack_top() {
        return Err(Fatal::at(FatalKind::OutsideForkRange, va));
    }

    let me = kernel.current_process_id();
    let flags = kernel.flags(page);

    if flags.is_writable() || flags.is_cow() {
        kernel
            .map_page(me, va, target, va, PageFlags::USER_COW)
            .map_err(|e| Fatal::syscall(Syscall::MapPage, e, va))?;
        kernel
            .map_page(me, va, me, va, PageFlags::USER_COW)
            .map_err(|e| Fatal::syscall(Syscall::MapPage, e, va))?;
        log::trace!("[{}] {} shared copy-on-write with {}", me, HumanAddress::from(va), target);
    } else {
        kernel
            .map_page(me, va, target, va, PageFlags::USER_RO)
            .map_err(|e| Fatal::syscall(Syscall::MapPage, e, va))?;
        log::trace!("[{}] {} shared read-only with {}", me, HumanAddress::from(va), target);
    }

    Ok(())
}
