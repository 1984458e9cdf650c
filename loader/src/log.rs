//! Log sinks for the loader, used with the `log` crate.
//!
//! Firmware consoles disappear at hand-off (UEFI's after `ExitBootServices`),
//! so a sink can be quiesced: it keeps its writer but stops touching it.

use core::fmt::Write;
use core::marker::Send;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::config::LoaderConfig;

/// Extended `Log` interface.
pub trait LogExt {
    /// Check if the sink is locked. A panic in the middle of a logging call
    /// leaves it locked, so a panic handler should use a different path then.
    fn is_locked(&self) -> bool;

    /// Drop all further output.
    fn quiesce(&self);
}

/// Writes formatted records to a `core::fmt::Write` impl. Locks internally.
pub struct LogSink<W> {
    writer: Mutex<W>,
    level: LevelFilter,
    quiesced: AtomicBool,
}

impl<W: Write + Send> LogSink<W> {
    pub fn new(writer: W, level: LevelFilter) -> Self {
        LogSink {
            writer: Mutex::new(writer),
            level,
            quiesced: AtomicBool::new(false),
        }
    }

    /// A sink filtered at [`LoaderConfig::log_level`].
    pub fn with_config(writer: W, config: &LoaderConfig) -> Self {
        Self::new(writer, config.log_level)
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> Log for LogSink<W> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && !self.quiesced.load(Ordering::Relaxed)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut writer = self.writer.lock();
        let _ = writeln!(
            &mut writer,
            "[{}] {}: {}",
            level_as_string(record.level()),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

impl<W: Write + Send> LogExt for LogSink<W> {
    fn is_locked(&self) -> bool {
        self.writer.is_locked()
    }

    fn quiesce(&self) {
        self.quiesced.store(true, Ordering::Relaxed);
    }
}

fn level_as_string(level: Level) -> &'static str {
    use Level::*;

    match level {
        Error => "ERROR",
        Warn => " WARN",
        Info => " INFO",
        Debug => "DEBUG",
        Trace => "TRACE",
    }
}

/// Forwards each record to two loggers, in order.
pub struct LogTee<L1, L2>(pub L1, pub L2);

impl<L1: Log, L2: Log> Log for LogTee<L1, L2> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.0.enabled(metadata) || self.1.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.0.log(record);
        self.1.log(record);
    }

    fn flush(&self) {
        self.0.flush();
        self.1.flush();
    }
}

impl<L1: LogExt, L2: LogExt> LogExt for LogTee<L1, L2> {
    fn is_locked(&self) -> bool {
        self.0.is_locked() || self.1.is_locked()
    }

    fn quiesce(&self) {
        self.0.quiesce();
        self.1.quiesce();
    }
}

/// Writes to QEMU's debug out port.
#[cfg(feature = "qemu_debugcon")]
pub struct QemuDebugWriter {
    _phantom: core::marker::PhantomData<*mut u8>,
}

#[cfg(feature = "qemu_debugcon")]
unsafe impl Send for QemuDebugWriter {}

#[cfg(feature = "qemu_debugcon")]
impl QemuDebugWriter {
    /// # Safety
    ///
    /// Port 0xe9 must be safe to write to, i.e. we are running under QEMU with
    /// `-debugcon` or on hardware where the port is unused.
    pub unsafe fn new() -> Self {
        QemuDebugWriter {
            _phantom: core::marker::PhantomData,
        }
    }
}

#[cfg(feature = "qemu_debugcon")]
impl Write for QemuDebugWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut port = x86_64::instructions::port::PortWriteOnly::<u8>::new(0xe9);
        // SAFETY: guaranteed by the constructor's contract.
        s.bytes().for_each(|b| unsafe { port.write(b) });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::string::String;

    use pretty_assertions::assert_eq;

    fn emit(logger: &dyn Log, level: Level, message: &str) {
        logger.log(
            &Record::builder()
                .args(format_args!("{}", message))
                .level(level)
                .target("yboot_loader::state")
                .build(),
        );
    }

    #[test]
    fn formats_records() {
        let sink = LogSink::new(String::new(), LevelFilter::Trace);
        emit(&sink, Level::Warn, "no video mode");
        emit(&sink, Level::Debug, "sealed");

        assert_eq!(
            sink.into_inner(),
            "[ WARN] yboot_loader::state: no video mode\n\
             [DEBUG] yboot_loader::state: sealed\n"
        );
    }

    #[test]
    fn filters_by_level() {
        let sink = LogSink::new(String::new(), LevelFilter::Info);
        emit(&sink, Level::Debug, "hidden");
        emit(&sink, Level::Error, "shown");

        assert_eq!(sink.into_inner(), "[ERROR] yboot_loader::state: shown\n");
    }

    #[test]
    fn level_comes_from_config() {
        let config = LoaderConfig {
            log_level: LevelFilter::Warn,
            ..LoaderConfig::default()
        };
        let sink = LogSink::with_config(String::new(), &config);
        emit(&sink, Level::Info, "hidden");
        emit(&sink, Level::Warn, "shown");

        assert_eq!(sink.into_inner(), "[ WARN] yboot_loader::state: shown\n");
    }

    #[test]
    fn quiesced_sink_writes_nothing() {
        let sink = LogSink::new(String::new(), LevelFilter::Trace);
        emit(&sink, Level::Info, "before");
        sink.quiesce();
        emit(&sink, Level::Error, "after");

        assert!(!sink.is_locked());
        assert_eq!(sink.into_inner(), "[ INFO] yboot_loader::state: before\n");
    }

    #[test]
    fn tee_forwards_to_both() {
        let tee = LogTee(
            LogSink::new(String::new(), LevelFilter::Info),
            LogSink::new(String::new(), LevelFilter::Trace),
        );
        emit(&tee, Level::Trace, "detail");
        emit(&tee, Level::Info, "summary");
        tee.quiesce();
        emit(&tee, Level::Info, "gone");

        let LogTee(first, second) = tee;
        assert_eq!(first.into_inner(), "[ INFO] yboot_loader::state: summary\n");
        assert_eq!(
            second.into_inner(),
            "[TRACE] yboot_loader::state: detail\n\
             [ INFO] yboot_loader::state: summary\n"
        );
    }
}
