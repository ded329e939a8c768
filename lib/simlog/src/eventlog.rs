//! The stable event-log surface spec.md §6 describes: one line per event, format
//! `"<virtual_time:10.4f> <event-name> <args...>"`, consumed by off-line plotting tools that live
//! outside the core. Kept separate from the [`crate`] diagnostic logger since its format is a
//! fixed contract (field order and widths matter to readers downstream), not a
//! level-filtered/free-text diagnostic stream.

use std::cell::RefCell;
use std::io::{self, Write};

/// Writes event-log lines to an underlying sink (by default, stdout). One `EventLog` is shared
/// (behind an `Rc`, by the caller) across every `Link`/`TcpSocket` in a run.
pub struct EventLog {
    writer: RefCell<Box<dyn Write>>,
}

impl EventLog {
    pub fn stdout() -> Self {
        Self::to_writer(io::stdout())
    }

    pub fn to_writer(writer: impl Write + 'static) -> Self {
        Self {
            writer: RefCell::new(Box::new(writer)),
        }
    }

    /// Emit one event-log line at virtual time `time`, with `event` as the event name and `args`
    /// as the pre-formatted remainder of the line.
    pub fn record(&self, time: f64, event: &str, args: std::fmt::Arguments<'_>) {
        let mut w = self.writer.borrow_mut();
        let _ = writeln!(w, "{time:10.4} {event} {args}");
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::stdout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_formats_stable_width_time_prefix() {
        // Box<dyn Write> doesn't expose its contents, so read back through a Write impl that
        // shares a Vec via Rc<RefCell<..>>.
        struct Sink(std::rc::Rc<RefCell<Vec<u8>>>);
        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.borrow_mut().write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let storage = std::rc::Rc::new(RefCell::new(Vec::new()));
        let log = EventLog::to_writer(Sink(storage.clone()));
        log.record(2.25, "transmit-end", format_args!("link=1"));
        let out = String::from_utf8(storage.borrow().clone()).unwrap();
        assert_eq!(out, "    2.2500 transmit-end link=1\n");
    }
}
