mod console;
mod fork;
mod ring;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use exofork::{HumanAddress, Strategy, emulation::EmulatorConfig, layout};

use crate::console::Console;

#[derive(Parser)]
#[command(name = "forksim")]
#[command(about = "Copy-on-write fork and E1000 transmit on a software exokernel")]
struct Args {
    /// Most verbose log level to print (default: trace in debug builds, info otherwise)
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fork a process, then write to a shared page from both sides
    Fork {
        /// Writable data pages mapped in the parent before forking
        #[arg(short, long, default_value_t = 1)]
        pages: usize,

        /// Text the parent writes; the child writes it uppercased
        #[arg(short, long, default_value = "hello")]
        message: String,

        /// How the child's memory relates to the parent's
        #[arg(short, long, value_enum, default_value_t = StrategyArg::Cow)]
        strategy: StrategyArg,

        /// Physical frames in the emulated machine
        #[arg(long, default_value_t = EmulatorConfig::default().frames)]
        frames: usize,

        /// Maximum live environments
        #[arg(long, default_value_t = EmulatorConfig::default().max_envs)]
        max_envs: usize,
    },
    /// Push packets through an E1000 transmit ring
    Ring {
        /// Descriptors in the ring
        #[arg(short, long, default_value_t = 4)]
        capacity: usize,

        /// Packets to send
        #[arg(short, long, default_value_t = 5)]
        packets: usize,

        /// Bytes per packet (truncated to the buffer size)
        #[arg(long, default_value_t = 64)]
        packet_size: usize,

        /// The NIC finishes one packet before every N transmits; 0 never drains
        #[arg(long, default_value_t = 0)]
        drain_every: usize,
    },
    /// Print the user address-space layout
    Layout,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Copy-on-write
    Cow,
    /// Shared memory (not implemented)
    Shared,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Cow => Strategy::CopyOnWrite,
            StrategyArg::Shared => Strategy::Shared,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn default_level() -> LevelFilter {
    #[cfg(debug_assertions)]
    return LevelFilter::Trace;
    #[cfg(not(debug_assertions))]
    return LevelFilter::Info;
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = args.log_level.map_or_else(default_level, LevelFilter::from);
    Console::init(level).map_err(|e| e.to_string())?;

    match args.command {
        Command::Fork {
            pages,
            message,
            strategy,
            frames,
            max_envs,
        } => {
            let report = fork::run(&fork::ForkOptions {
                pages,
                message,
                strategy: strategy.into(),
                config: EmulatorConfig { frames, max_envs },
            })?;
            fork::print(&report);
        }
        Command::Ring {
            capacity,
            packets,
            packet_size,
            drain_every,
        } => {
            let report = ring::run(&ring::RingOptions {
                capacity,
                packets,
                packet_size,
                drain_every,
            })?;
            ring::print(&report);
        }
        Command::Layout => print_layout(),
    }

    Ok(())
}

fn print_layout() {
    let regions = [
        ("UXSTACKTOP", layout::UXSTACKTOP, "top of the exception stack"),
        ("UXSTACK", layout::UXSTACK_BOTTOM, "exception stack page, never shared"),
        ("USTACKTOP", layout::USTACKTOP, "top of the normal stack; fork copies below"),
        ("UTEXT", layout::UTEXT, "program text and data"),
        ("PFTEMP", layout::PFTEMP, "scratch page for fault repair"),
        ("UTEMP", layout::UTEMP, "start of user memory"),
    ];
    for (name, addr, what) in regions {
        let addr = format!("{}", HumanAddress(addr));
        println!("{:<10} {:>12}  {}", name, addr, what);
    }
}
