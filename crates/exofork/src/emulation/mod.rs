//! Software emulation of the exokernel for testing and development.
//!
//! [`EmulatedKernel`] is a host-side model of the kernel half of the system:
//! environments with two-level page tables, a reference-counted frame pool,
//! the page-mapping system calls with their argument checks, and page-fault
//! delivery to a registered upcall on the exception stack.
//!
//! Only one environment runs at a time. [`UserMemory`] accesses and the
//! [`PageTableView`] act as the current environment; switching is explicit
//! through [`EmulatedKernel::run`].

mod memory;
mod page_directory;

use alloc::{collections::BTreeMap, vec::Vec};
use core::fmt;

use crate::{
    EnvId, EnvInfo, EnvStatus, FrameNumber, HumanAddress, PageFlags, PageNumber, VirtualAddress,
    error::{AccessError, SyscallError, Termination},
    fault::FaultRecord,
    layout::{PAGE_SIZE, UXSTACK_BOTTOM},
    syscall::{Exokernel, ForkOutcome, PageTableView, Upcall, UserMemory},
};

pub use memory::PhysicalMemory;
pub use page_directory::{PageDirectory, PageEntry};

/// First identifier handed out; zero never names an environment.
const FIRST_ENV_ID: u32 = 0x1000;

/// Sizing of an emulated machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulatorConfig {
    /// Number of physical page frames.
    pub frames: usize,
    /// Maximum number of live environments.
    pub max_envs: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            frames: 256,
            max_envs: 64,
        }
    }
}

/// A frame mapped writable while also mapped elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharingViolation {
    pub frame: FrameNumber,
    /// Total number of mappings of the frame across live environments.
    pub mappings: usize,
}

impl fmt::Display for SharingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {:?} is writable with {} mappings",
            self.frame, self.mappings
        )
    }
}

impl core::error::Error for SharingViolation {}

struct Env {
    info: EnvInfo,
    pgdir: PageDirectory,
    upcall: Option<Upcall<EmulatedKernel>>,
    /// Set on creation; the next `create_child` by this environment returns
    /// [`ForkOutcome::Child`].
    pending_child_return: bool,
    termination: Option<Termination>,
}

impl Env {
    fn is_live(&self) -> bool {
        !matches!(self.info.status, EnvStatus::Free | EnvStatus::Dying)
    }
}

/// The emulated exokernel.
pub struct EmulatedKernel {
    memory: PhysicalMemory,
    envs: BTreeMap<EnvId, Env>,
    current: Option<EnvId>,
    next_id: u32,
    max_envs: usize,
}

impl EmulatedKernel {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            memory: PhysicalMemory::new(config.frames),
            envs: BTreeMap::new(),
            current: None,
            next_id: FIRST_ENV_ID,
            max_envs: config.max_envs,
        }
    }

    /// Creates a runnable environment with an empty address space and no parent.
    pub fn spawn(&mut self) -> Result<EnvId, SyscallError> {
        self.alloc_env(None, EnvStatus::Runnable, false)
    }

    /// Switches the CPU to `env`.
    pub fn run(&mut self, env: EnvId) -> Result<(), SyscallError> {
        let status = self.envs.get(&env).ok_or(SyscallError::BadEnv)?.info.status;
        if !matches!(status, EnvStatus::Runnable | EnvStatus::Running) {
            return Err(SyscallError::BadEnv);
        }

        if let Some(prev) = self.current.take().and_then(|id| self.envs.get_mut(&id)) {
            if prev.info.status == EnvStatus::Running {
                prev.info.status = EnvStatus::Runnable;
            }
        }

        if let Some(next) = self.envs.get_mut(&env) {
            next.info.status = EnvStatus::Running;
        }
        self.current = Some(env);
        log::trace!("[{}] running", env);
        Ok(())
    }

    /// Returns the environment currently on the CPU.
    pub fn current(&self) -> Option<EnvId> {
        self.current
    }

    /// Returns the number of environments that are neither free nor dying.
    pub fn live_envs(&self) -> usize {
        self.envs.values().filter(|env| env.is_live()).count()
    }

    /// Returns every environment created by `parent`.
    pub fn children_of(&self, parent: EnvId) -> Vec<EnvId> {
        self.envs
            .values()
            .filter(|env| env.info.parent == Some(parent))
            .map(|env| env.info.id)
            .collect()
    }

    /// Returns why `env` was terminated, if it was.
    pub fn termination(&self, env: EnvId) -> Option<Termination> {
        self.envs.get(&env).and_then(|env| env.termination)
    }

    /// Returns the frame and permissions mapped at `va` in `env`.
    pub fn mapping(&self, env: EnvId, va: VirtualAddress) -> Option<(FrameNumber, PageFlags)> {
        let entry = self.envs.get(&env)?.pgdir.entry(va);
        Some((entry.frame()?, entry.flags()))
    }

    /// Returns every mapping of `env` in address order.
    pub fn user_mappings(&self, env: EnvId) -> Vec<(VirtualAddress, FrameNumber, PageFlags)> {
        let Some(env) = self.envs.get(&env) else {
            return Vec::new();
        };
        env.pgdir
            .mappings()
            .filter_map(|(va, entry)| Some((va, entry.frame()?, entry.flags())))
            .collect()
    }

    /// Reads `len` bytes of `env`'s memory with kernel privilege: no
    /// permission checks and no faults. Returns `None` if any page is unmapped.
    pub fn peek(&self, env: EnvId, va: VirtualAddress, len: usize) -> Option<Vec<u8>> {
        let env = self.envs.get(&env)?;
        let mut out = Vec::with_capacity(len);
        let mut addr = va;
        while out.len() < len {
            let frame = env.pgdir.entry(addr).frame()?;
            let offset = addr.page_offset();
            let chunk = (PAGE_SIZE - offset).min(len - out.len());
            out.extend_from_slice(&self.memory.page(frame)[offset..offset + chunk]);
            addr = addr + chunk;
        }
        Some(out)
    }

    pub fn frame_refs(&self, frame: FrameNumber) -> u32 {
        self.memory.refs(frame)
    }

    pub fn free_frames(&self) -> usize {
        self.memory.free_count()
    }

    /// Verifies that no frame mapped writable anywhere is mapped more than once
    /// across all live environments.
    pub fn check_exclusive_writable(&self) -> Result<(), SharingViolation> {
        let mut frames: BTreeMap<FrameNumber, (usize, bool)> = BTreeMap::new();
        for env in self.envs.values().filter(|env| env.is_live()) {
            for (_, entry) in env.pgdir.mappings() {
                if let Some(frame) = entry.frame() {
                    let slot = frames.entry(frame).or_default();
                    slot.0 += 1;
                    slot.1 |= entry.flags().is_writable();
                }
            }
        }

        match frames
            .into_iter()
            .find(|&(_, (count, writable))| writable && count > 1)
        {
            Some((frame, (mappings, _))) => Err(SharingViolation { frame, mappings }),
            None => Ok(()),
        }
    }

    fn alloc_env(
        &mut self,
        parent: Option<EnvId>,
        status: EnvStatus,
        pending_child_return: bool,
    ) -> Result<EnvId, SyscallError> {
        if self.live_envs() >= self.max_envs {
            return Err(SyscallError::NoFreeEnv);
        }

        let id = EnvId::new(self.next_id);
        self.next_id += 1;
        self.envs.insert(
            id,
            Env {
                info: EnvInfo { id, parent, status },
                pgdir: PageDirectory::new(),
                upcall: None,
                pending_child_return,
                termination: None,
            },
        );
        log::debug!("new env {} (parent {:?})", id, parent);
        Ok(id)
    }

    /// Resolves `env` for a system call made by the current environment.
    ///
    /// The target must be the caller itself or one of its direct children.
    fn check_target(&self, env: EnvId) -> Result<(), SyscallError> {
        let caller = self.current.ok_or(SyscallError::BadEnv)?;
        let target = self.envs.get(&env).ok_or(SyscallError::BadEnv)?;
        if !target.is_live() {
            return Err(SyscallError::BadEnv);
        }
        if env == caller || target.info.parent == Some(caller) {
            Ok(())
        } else {
            Err(SyscallError::BadEnv)
        }
    }

    /// Installs `frame` at `va` in `env`, replacing whatever was there.
    fn insert_page(
        &mut self,
        env: EnvId,
        va: VirtualAddress,
        frame: FrameNumber,
        perm: PageFlags,
    ) -> Result<(), SyscallError> {
        let Self { memory, envs, .. } = self;
        let target = envs.get_mut(&env).ok_or(SyscallError::BadEnv)?;
        let entry = target
            .pgdir
            .walk_or_create(va, memory)
            .ok_or(SyscallError::NoMemory)?;

        // Take the new reference first so re-inserting the same frame is safe.
        memory.incref(frame);
        if let Some(old) = entry.frame() {
            memory.decref(old);
        }
        *entry = PageEntry::new(frame, perm | PageFlags::PRESENT);
        Ok(())
    }

    /// Translates a user access, delivering at most one page fault.
    fn translate(
        &mut self,
        va: VirtualAddress,
        write: bool,
    ) -> Result<FrameNumber, AccessError> {
        let mut delivered = None;
        loop {
            let id = self.current.ok_or(AccessError::NoCurrentEnv)?;
            let entry = self
                .envs
                .get(&id)
                .map(|env| env.pgdir.entry(va))
                .unwrap_or_default();
            let flags = entry.flags();
            let allowed = va.is_user() && flags.is_user() && (!write || flags.is_writable());
            if let (true, Some(frame)) = (allowed, entry.frame()) {
                return Ok(frame);
            }

            if let Some(previous) = delivered {
                return Err(self.terminate(id, Termination::FaultNotRepaired(previous)));
            }
            let record = FaultRecord::user_access(va, flags.is_present(), write);
            self.deliver_fault(id, record)?;
            delivered = Some(record);
        }
    }

    /// Pushes `record` onto `id`'s exception stack and runs its upcall.
    fn deliver_fault(&mut self, id: EnvId, record: FaultRecord) -> Result<(), AccessError> {
        let Some(env) = self.envs.get(&id) else {
            return Err(AccessError::NoCurrentEnv);
        };
        let Some(upcall) = env.upcall else {
            return Err(self.terminate(id, Termination::UnhandledFault(record)));
        };

        let xstack = env.pgdir.entry(VirtualAddress::new(UXSTACK_BOTTOM));
        let frame = match xstack.frame() {
            Some(frame) if xstack.flags().contains(PageFlags::USER_RW) => frame,
            _ => return Err(self.terminate(id, Termination::ExceptionStackUnusable(record))),
        };

        let bytes = record.encode();
        self.memory.page_mut(frame)[PAGE_SIZE - bytes.len()..].copy_from_slice(&bytes);
        log::trace!("[{}] delivering {}", id, record);

        let outcome = upcall(self, &record);
        if let Some(reason) = self.termination(id) {
            return Err(AccessError::Terminated(reason));
        }
        match outcome {
            Ok(()) => Ok(()),
            Err(fatal) => Err(self.terminate(id, Termination::Fatal(fatal))),
        }
    }

    /// Destroys `id`, releasing its address space. The first reason sticks.
    fn terminate(&mut self, id: EnvId, reason: Termination) -> AccessError {
        let Self {
            memory,
            envs,
            current,
            ..
        } = self;
        let Some(env) = envs.get_mut(&id) else {
            return AccessError::Terminated(reason);
        };
        if let Some(first) = env.termination {
            return AccessError::Terminated(first);
        }

        log::warn!("[{}] terminated: {}", id, reason);
        env.termination = Some(reason);
        env.info.status = EnvStatus::Dying;
        env.upcall = None;
        core::mem::take(&mut env.pgdir).release(memory);
        if *current == Some(id) {
            *current = None;
        }
        AccessError::Terminated(reason)
    }
}

fn check_user_page(va: VirtualAddress) -> Result<(), SyscallError> {
    if va.is_user() && va.is_page_aligned() {
        Ok(())
    } else {
        Err(SyscallError::Invalid)
    }
}

fn check_perm(perm: PageFlags) -> Result<(), SyscallError> {
    if perm.contains(PageFlags::USER_RO) && perm.is_subset_of(PageFlags::SYSCALL) {
        Ok(())
    } else {
        Err(SyscallError::Invalid)
    }
}

impl Exokernel for EmulatedKernel {
    fn current_process_id(&self) -> EnvId {
        self.current.unwrap_or(EnvId::new(0))
    }

    fn env_info(&self, env: EnvId) -> Result<EnvInfo, SyscallError> {
        self.envs
            .get(&env)
            .map(|env| env.info)
            .ok_or(SyscallError::BadEnv)
    }

    fn create_child(&mut self) -> Result<ForkOutcome, SyscallError> {
        let caller = self.current.ok_or(SyscallError::BadEnv)?;
        let env = self.envs.get_mut(&caller).ok_or(SyscallError::BadEnv)?;
        if env.pending_child_return {
            env.pending_child_return = false;
            return Ok(ForkOutcome::Child);
        }

        let child = self.alloc_env(Some(caller), EnvStatus::NotRunnable, true)?;
        Ok(ForkOutcome::Parent(child))
    }

    fn allocate_page(
        &mut self,
        env: EnvId,
        va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SyscallError> {
        self.check_target(env)?;
        check_user_page(va)?;
        check_perm(perm)?;

        let frame = self.memory.allocate().ok_or(SyscallError::NoMemory)?;
        if let Err(e) = self.insert_page(env, va, frame, perm) {
            self.memory.free(frame);
            return Err(e);
        }
        Ok(())
    }

    fn map_page(
        &mut self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SyscallError> {
        self.check_target(src_env)?;
        self.check_target(dst_env)?;
        check_user_page(src_va)?;
        check_user_page(dst_va)?;
        check_perm(perm)?;

        let source = self
            .envs
            .get(&src_env)
            .ok_or(SyscallError::BadEnv)?
            .pgdir
            .entry(src_va);
        let frame = source.frame().ok_or(SyscallError::Invalid)?;
        if perm.is_writable() && !source.flags().is_writable() {
            return Err(SyscallError::Invalid);
        }

        self.insert_page(dst_env, dst_va, frame, perm)
    }

    fn unmap_page(&mut self, env: EnvId, va: VirtualAddress) -> Result<(), SyscallError> {
        self.check_target(env)?;
        check_user_page(va)?;

        let Self { memory, envs, .. } = self;
        let target = envs.get_mut(&env).ok_or(SyscallError::BadEnv)?;
        if let Some(entry) = target.pgdir.walk(va) {
            if let Some(frame) = entry.frame() {
                entry.clear();
                memory.decref(frame);
            }
        }
        Ok(())
    }

    fn set_fault_upcall(&mut self, env: EnvId, upcall: Upcall<Self>) -> Result<(), SyscallError> {
        self.check_target(env)?;
        let target = self.envs.get_mut(&env).ok_or(SyscallError::BadEnv)?;
        target.upcall = Some(upcall);
        Ok(())
    }

    fn set_runnable(&mut self, env: EnvId) -> Result<(), SyscallError> {
        self.check_target(env)?;
        let target = self.envs.get_mut(&env).ok_or(SyscallError::BadEnv)?;
        if target.info.status != EnvStatus::Running {
            target.info.status = EnvStatus::Runnable;
        }
        Ok(())
    }
}

impl PageTableView for EmulatedKernel {
    fn directory_entry(&self, va: VirtualAddress) -> PageFlags {
        self.current
            .and_then(|id| self.envs.get(&id))
            .map(|env| env.pgdir.directory_entry(va))
            .unwrap_or_default()
    }

    fn table_entry(&self, page: PageNumber) -> PageFlags {
        self.current
            .and_then(|id| self.envs.get(&id))
            .map(|env| env.pgdir.entry(page.start()).flags())
            .unwrap_or_default()
    }
}

impl UserMemory for EmulatedKernel {
    fn load(&mut self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), AccessError> {
        let mut done = 0;
        while done < buf.len() {
            let addr = va + done;
            let offset = addr.page_offset();
            let chunk = (PAGE_SIZE - offset).min(buf.len() - done);
            let frame = self.translate(addr, false)?;
            buf[done..done + chunk].copy_from_slice(&self.memory.page(frame)[offset..offset + chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn store(&mut self, va: VirtualAddress, data: &[u8]) -> Result<(), AccessError> {
        let mut done = 0;
        while done < data.len() {
            let addr = va + done;
            let offset = addr.page_offset();
            let chunk = (PAGE_SIZE - offset).min(data.len() - done);
            let frame = self.translate(addr, true)?;
            self.memory.page_mut(frame)[offset..offset + chunk]
                .copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn memmove(
        &mut self,
        dst: VirtualAddress,
        src: VirtualAddress,
        len: usize,
    ) -> Result<(), AccessError> {
        let mut staging = alloc::vec![0u8; len];
        self.load(src, &mut staging)?;
        self.store(dst, &staging)?;
        log::trace!(
            "memmove {} <- {} ({} bytes)",
            HumanAddress::from(dst),
            HumanAddress::from(src),
            len
        );
        Ok(())
    }
}
