//! A `log`-crate facade that stamps diagnostics with *virtual* simulation time instead of wall
//! clock time, plus a separate stable event-log writer for the plotting surface spec.md §6 names.
//!
//! Grounded on `shadow-shadow/src/main/core/logger/shadow_logger.rs`'s `ShadowLogger`: a single
//! process-wide `Log` implementation that attaches simulation context (there: `EmulatedTime` via
//! `Worker::current_time()`) to every record instead of the wall clock the `log` crate defaults
//! to. We drop everything in that file that exists to make logging cheap from many real OS
//! threads under heavy load — the `ArrayQueue`/`mpsc` background flush thread, the
//! `SYNC`/`ASYNC_FLUSH` watermarks, the panic hook — because this simulator is single-threaded and
//! cooperative, so a synchronous `println!` per record is already as cheap as logging gets here.
//! What's kept is the core idea: a thread-local "current time" the scheduler updates as it runs,
//! consulted by the logger on every call.

pub mod eventlog;

use std::cell::Cell;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

thread_local! {
    static CURRENT_TIME: Cell<Option<f64>> = const { Cell::new(None) };
}

/// Record the virtual time that subsequent log lines on this thread should be stamped with.
/// Called by the scheduler immediately after it advances `now()` and before it runs the
/// callback/flow scheduled for that time.
pub fn set_current_time(t: f64) {
    CURRENT_TIME.with(|c| c.set(Some(t)));
}

/// The virtual time most recently recorded by [`set_current_time`], or `None` before the
/// scheduler has started running.
pub fn current_time() -> Option<f64> {
    CURRENT_TIME.with(|c| c.get())
}

static LOGGER: SimLogger = SimLogger;

/// Install [`SimLogger`] as the `log` crate's global logger and raise the max level to `level`.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// A [`Log`] implementation that prefixes each record with virtual simulation time (`n/a` before
/// the scheduler starts) rather than a wall-clock timestamp.
struct SimLogger;

impl Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let time = match current_time() {
            Some(t) => format!("{t:10.4}"),
            None => "       n/a".to_string(),
        };
        let file = record
            .file()
            .and_then(|f| f.rsplit('/').next())
            .unwrap_or("n/a");
        let line = record
            .line()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "n/a".to_string());

        let line_out = format!(
            "{time} [{level}] [{file}:{line}] {msg}",
            level = record.level(),
            msg = record.args(),
        );
        if record.level() <= Level::Error {
            eprintln!("{line_out}");
        } else {
            println!("{line_out}");
        }
    }

    fn flush(&self) {
        use std::io::Write;
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}
