//! Defines the console logger that writes log records to standard error.

use std::io::Write as _;

use log::LevelFilter;
use spin::{Mutex, Once};

pub struct Console {
    stderr: Mutex<Option<StderrWriter>>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub fn init(max_level: LevelFilter) -> Result<&'static Self, log::SetLoggerError> {
        let console = Self::default();
        console.attach_stderr(StderrWriter);
        console.install(max_level)?;
        Ok(console)
    }

    pub fn default() -> &'static Self {
        DEFAULT.call_once(|| Console {
            stderr: Mutex::new(None),
        })
    }

    pub fn install(&'static self, max_level: LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(max_level);
        Ok(())
    }

    pub fn attach_stderr(&self, writer: StderrWriter) {
        *self.stderr.lock() = Some(writer);
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(stderr) = &mut *self.stderr.lock() {
            // Nowhere left to report a failed log write.
            let _ = write_log_entry_to(stderr, record);
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Forwards formatted output to the process's standard error.
pub struct StderrWriter;

impl core::fmt::Write for StderrWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        std::io::stderr()
            .write_all(s.as_bytes())
            .map_err(|_| core::fmt::Error)
    }
}

fn write_log_entry_to(
    writer: &mut impl core::fmt::Write,
    record: &log::Record,
) -> core::fmt::Result {
    #[cfg(feature = "detailed-logging")]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(feature = "detailed-logging"))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_format() {
        let mut out = String::new();
        write_log_entry_to(
            &mut out,
            &log::Record::builder()
                .args(format_args!("fork: created child 00001001"))
                .level(log::Level::Debug)
                .target("exofork::fork")
                .file(Some("fork.rs"))
                .line(Some(42))
                .build(),
        )
        .unwrap();

        #[cfg(feature = "detailed-logging")]
        assert_eq!(
            out,
            "[DEBUG fork.rs:42 exofork::fork] fork: created child 00001001\n"
        );
        #[cfg(not(feature = "detailed-logging"))]
        assert_eq!(out, "[DEBUG] fork: created child 00001001\n");
    }

    #[test]
    fn default_console_is_shared() {
        let a = Console::default() as *const Console;
        let b = Console::default() as *const Console;
        assert_eq!(a, b);
    }

    #[test]
    fn attach_fills_writer_slot() {
        let console = Console::default();
        console.attach_stderr(StderrWriter);
        assert!(console.stderr.lock().is_some());
    }
}
