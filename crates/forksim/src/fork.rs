//! Fork walkthrough: a parent shares a page with its child, then both write.

use std::error::Error;

use exofork::{
    EnvId, Exokernel, ForkOutcome, FrameNumber, HumanAddress, PageFlags, Strategy, ThisEnv,
    UserMemory, VirtualAddress,
    emulation::{EmulatedKernel, EmulatorConfig},
    fork_with,
    layout::{PAGE_SIZE, USTACKTOP, UTEXT},
};

pub struct ForkOptions {
    /// Writable data pages mapped in the parent before forking.
    pub pages: usize,
    /// Text the parent writes at the start of its data.
    pub message: String,
    pub strategy: Strategy,
    pub config: EmulatorConfig,
}

/// One line of a page-table dump.
pub struct Mapping {
    pub va: VirtualAddress,
    pub frame: FrameNumber,
    pub flags: PageFlags,
}

/// What each side saw.
pub struct ForkReport {
    pub parent: EnvId,
    pub child: EnvId,
    /// Parent's mappings right after fork.
    pub parent_after_fork: Vec<Mapping>,
    /// Child's mappings right after fork.
    pub child_after_fork: Vec<Mapping>,
    /// Child's mappings after its write was repaired.
    pub child_after_write: Vec<Mapping>,
    pub parent_view: Vec<u8>,
    pub child_view: Vec<u8>,
    pub free_frames: usize,
}

pub fn run(options: &ForkOptions) -> Result<ForkReport, Box<dyn Error>> {
    let message = options.message.as_bytes();
    let capacity = options
        .pages
        .checked_mul(PAGE_SIZE)
        .filter(|&bytes| bytes <= USTACKTOP - UTEXT)
        .ok_or_else(|| format!("{} data pages do not fit below the stack", options.pages))?;
    if message.len() > capacity {
        return Err(format!(
            "a {}-byte message does not fit in {} pages",
            message.len(),
            options.pages
        )
        .into());
    }

    let mut kernel = EmulatedKernel::new(options.config);
    let parent = kernel.spawn()?;
    kernel.run(parent)?;
    let mut this = ThisEnv::new(kernel.env_info(parent)?);

    let data = VirtualAddress::new(UTEXT);
    for page in 0..options.pages {
        kernel.allocate_page(parent, data + page * PAGE_SIZE, PageFlags::USER_RW)?;
    }
    kernel.store(data, message)?;

    let child = match fork_with(&mut kernel, &mut this, options.strategy)? {
        ForkOutcome::Parent(child) => child,
        ForkOutcome::Child => return Err("parent resumed on the child side of fork".into()),
    };
    log::info!("[{}] forked child {}", parent, child);
    let parent_after_fork = dump(&kernel, parent);
    let child_after_fork = dump(&kernel, child);

    kernel.run(child)?;
    let mut child_this = this.clone();
    if fork_with(&mut kernel, &mut child_this, options.strategy)? != ForkOutcome::Child {
        return Err("child resumed on the parent side of fork".into());
    }
    kernel.store(data, options.message.to_ascii_uppercase().as_bytes())?;
    kernel.check_exclusive_writable()?;
    let child_after_write = dump(&kernel, child);

    kernel.run(parent)?;
    let mut parent_view = vec![0u8; message.len()];
    kernel.load(data, &mut parent_view)?;
    let child_view = kernel
        .peek(child, data, message.len())
        .ok_or("child data page is no longer mapped")?;

    Ok(ForkReport {
        parent,
        child,
        parent_after_fork,
        child_after_fork,
        child_after_write,
        parent_view,
        child_view,
        free_frames: kernel.free_frames(),
    })
}

fn dump(kernel: &EmulatedKernel, env: EnvId) -> Vec<Mapping> {
    kernel
        .user_mappings(env)
        .into_iter()
        .map(|(va, frame, flags)| Mapping { va, frame, flags })
        .collect()
}

pub fn print(report: &ForkReport) {
    print_mappings("parent after fork", report.parent, &report.parent_after_fork);
    print_mappings("child after fork", report.child, &report.child_after_fork);
    print_mappings("child after write", report.child, &report.child_after_write);

    println!(
        "parent {} reads {:?}",
        report.parent,
        String::from_utf8_lossy(&report.parent_view)
    );
    println!(
        "child  {} reads {:?}",
        report.child,
        String::from_utf8_lossy(&report.child_view)
    );
    println!("{} frames free", report.free_frames);
}

fn print_mappings(title: &str, env: EnvId, mappings: &[Mapping]) {
    println!("{} ({}):", title, env);
    for mapping in mappings {
        let va = format!("{}", HumanAddress::from(mapping.va));
        println!("  {:>12}  {}  {:?}", va, mapping.flags, mapping.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(strategy: Strategy) -> ForkOptions {
        ForkOptions {
            pages: 2,
            message: String::from("hello"),
            strategy,
            config: EmulatorConfig::default(),
        }
    }

    #[test]
    fn each_side_keeps_its_own_write() {
        let report = run(&options(Strategy::CopyOnWrite)).unwrap();
        assert_eq!(report.parent_view, b"hello");
        assert_eq!(report.child_view, b"HELLO");

        let first = |mappings: &[Mapping]| mappings[0].flags;
        assert_eq!(first(&report.parent_after_fork), PageFlags::USER_COW);
        assert_eq!(first(&report.child_after_fork), PageFlags::USER_COW);
        assert_eq!(first(&report.child_after_write), PageFlags::USER_RW);
    }

    #[test]
    fn shared_strategy_is_refused() {
        let err = run(&options(Strategy::Shared)).err().unwrap();
        assert_eq!(err.to_string(), "sfork not implemented");
    }

    #[test]
    fn message_must_fit() {
        let mut opts = options(Strategy::CopyOnWrite);
        opts.pages = 0;
        assert!(run(&opts).is_err());
    }

    #[test]
    fn huge_page_count_is_refused() {
        let mut opts = options(Strategy::CopyOnWrite);
        for pages in [usize::MAX, (USTACKTOP - UTEXT) / PAGE_SIZE + 1] {
            opts.pages = pages;
            let err = run(&opts).err().unwrap();
            assert_eq!(
                err.to_string(),
                format!("{} data pages do not fit below the stack", pages)
            );
        }
    }
}
