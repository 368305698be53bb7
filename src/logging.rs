/*
 * Logging sink
 *
 * A minimal `log::Log` implementation that formats records through a
 * core::fmt::Write sink. Board code supplies the sink (typically a USART
 * writer); this module only owns the formatting and level filtering, the
 * same split the teacher keeps between `utils/debug/logger.rs` and the
 * serial port it writes to.
 */

use core::fmt::Write;
use log::{Level, LevelFilter, Metadata, Record};
use spin::Mutex;

/// Anything byte-oriented code can log onto. Board support installs a real
/// sink (USART, SPI-attached display, ...) via [`set_sink`].
pub trait LogSink: Write + Send {}
impl<T: Write + Send> LogSink for T {}

static SINK: Mutex<Option<&'static mut dyn LogSink>> = Mutex::new(None);

struct BermudaLogger;

impl log::Log for BermudaLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut guard = SINK.lock();
        if let Some(sink) = guard.as_mut() {
            let _ = writeln!(sink, "[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: BermudaLogger = BermudaLogger;

/// Install `sink` as the destination for all log output and set the
/// maximum level. Must be called once during `bermuda_os::init` before any
/// other module logs.
pub fn init(sink: &'static mut dyn LogSink, level: LevelFilter) {
    *SINK.lock() = Some(sink);
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(level));
}

/// Logging level presets mirroring the common development/release split.
pub fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}
