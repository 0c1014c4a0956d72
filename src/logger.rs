//! Logging infrastructure.
//!
//! A single `log::Log` implementor, installed once at boot, that tags
//! every line with a relative timestamp (ticks of the free-running
//! counter since boot — spec §7's "a single line per significant
//! event tagged with a module name"). Output goes through a [`Sink`]
//! the embedding application provides, so this crate does not have to
//! own a serial driver of its own (the serial peripheral and its
//! string-formatting layer are excluded external collaborators per
//! spec §1).

use core::fmt::Write;
use core::sync::atomic::{AtomicU64, Ordering};
use log::{Level, LevelFilter, Metadata, Record};
use spin::Mutex;

/// Somewhere a log line can go. Implemented by the application's
/// serial/UART driver and handed to [`init`].
pub trait Sink: Send {
    fn write_str(&mut self, s: &str);
}

struct SinkWriter<'a>(&'a mut dyn Sink);

impl Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

static BOOT_TICKS: AtomicU64 = AtomicU64::new(0);
static SINK: Mutex<Option<&'static mut dyn Sink>> = Mutex::new(None);

struct SinkLogger;

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let ticks = ticks_since_boot();
        let mut guard = SINK.lock();
        if let Some(sink) = guard.as_deref_mut() {
            let mut writer = SinkWriter(sink);
            let _ = writeln!(
                writer,
                "[{:>12}] [{}] {}: {}",
                ticks,
                level,
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: SinkLogger = SinkLogger;

fn ticks_since_boot() -> u64 {
    let now = crate::arch::physical_counter();
    let boot = BOOT_TICKS.load(Ordering::Relaxed);
    now.saturating_sub(boot)
}

/// Install the logger, directing output at `sink`. `sink` must live
/// for the remainder of the program, which on a static bare-metal
/// image is always true for a `&'static mut` handed in from the
/// application's entry point.
pub fn init(sink: &'static mut dyn Sink) {
    BOOT_TICKS.store(crate::arch::physical_counter(), Ordering::Relaxed);
    *SINK.lock() = Some(sink);
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Debug))
        .expect("logger already initialized");
}

/// Change the maximum log level at runtime.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
