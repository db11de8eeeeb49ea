//! Colored console logger for the host tool.
//!
//! The level comes from the `LOG` environment variable
//! (`ERROR`/`WARN`/`INFO`/`DEBUG`/`TRACE`); without it logging is off.
use log::{Level, LevelFilter, Log, Metadata, Record};

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        eprintln!(
            "\u{1B}[{}m[{:>5}] {}\u{1B}[0m",
            color,
            record.level(),
            record.args(),
        );
    }
    fn flush(&self) {}
}

fn level_from_env() -> LevelFilter {
    match std::env::var("LOG").as_deref() {
        Ok("ERROR") => LevelFilter::Error,
        Ok("WARN") => LevelFilter::Warn,
        Ok("INFO") => LevelFilter::Info,
        Ok("DEBUG") => LevelFilter::Debug,
        Ok("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Install the logger. `verbose` raises the level to at least `Debug`.
pub fn init(verbose: bool) {
    static LOGGER: SimpleLogger = SimpleLogger;
    // a second init (tests) keeps the first logger
    if log::set_logger(&LOGGER).is_err() {
        return;
    }
    let level = level_from_env();
    log::set_max_level(if verbose {
        level.max(LevelFilter::Debug)
    } else {
        level
    });
}
