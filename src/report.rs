//! User-facing messages and the once-only completion report.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// Destination for the messages a run shows its user.
pub trait MessageSink {
    fn message(&self, level: Level, text: &str);

    fn info(&self, text: &str) {
        self.message(Level::Info, text);
    }

    fn warning(&self, text: &str) {
        self.message(Level::Warning, text);
    }

    fn error(&self, text: &str) {
        self.message(Level::Error, text);
    }
}

/// Prints each message to stdout and repeats it on the tracing log.
#[derive(Clone, Copy, Debug, Default)]
pub struct Console;

impl MessageSink for Console {
    fn message(&self, level: Level, text: &str) {
        println!("{text}");
        match level {
            Level::Info => info!(target: "tool", "{text}"),
            Level::Warning => warn!(target: "tool", "{text}"),
            Level::Error => error!(target: "tool", "{text}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: RefCell<Vec<(Level, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages.borrow().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages.borrow().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .borrow()
            .iter()
            .filter(|(_, t)| t.contains(needle))
            .count()
    }
}

impl MessageSink for RecordingSink {
    fn message(&self, level: Level, text: &str) {
        self.messages.borrow_mut().push((level, text.to_string()));
    }
}

/// Counts updated records and reports the total and elapsed time exactly
/// once: on [`finish`](Self::finish), or when dropped on any other path.
pub struct CompletionReport<'a> {
    sink: &'a dyn MessageSink,
    start: Instant,
    updated: usize,
    reported: bool,
}

impl<'a> CompletionReport<'a> {
    pub fn start(sink: &'a dyn MessageSink) -> Self {
        Self {
            sink,
            start: Instant::now(),
            updated: 0,
            reported: false,
        }
    }

    pub fn record_update(&mut self) {
        self.updated += 1;
    }

    pub fn updated(&self) -> usize {
        self.updated
    }

    pub fn discard_updates(&mut self) {
        self.updated = 0;
    }

    pub fn finish(mut self) -> (usize, Duration) {
        let elapsed = self.report();
        (self.updated, elapsed)
    }

    fn report(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if !self.reported {
            self.reported = true;
            self.sink
                .info(&format!("Total bearings calculated = {}", self.updated));
            self.sink.info(&format!(
                "Total execution time (secs) = {:.3}",
                elapsed.as_secs_f64()
            ));
        }
        elapsed
    }
}

impl Drop for CompletionReport<'_> {
    fn drop(&mut self) {
        self.report();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn finish_reports_once() {
        let sink = RecordingSink::new();
        let mut report = CompletionReport::start(&sink);
        report.record_update();
        report.record_update();
        let (updated, _) = report.finish();

        assert_eq!(updated, 2);
        assert_eq!(sink.count_containing("Total bearings calculated = 2"), 1);
        assert_eq!(sink.count_containing("Total execution time (secs) = "), 1);
        assert_eq!(sink.messages().len(), 2);
    }

    #[test]
    fn drop_reports_when_not_finished() {
        let sink = RecordingSink::new();
        {
            let mut report = CompletionReport::start(&sink);
            report.record_update();
        }
        assert_eq!(sink.texts()[0], "Total bearings calculated = 1");
        assert_eq!(sink.messages().len(), 2);
    }

    #[test]
    fn drop_reports_during_unwind() {
        let sink = RecordingSink::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _report = CompletionReport::start(&sink);
            panic!("cursor exploded");
        }));
        assert!(result.is_err());
        assert_eq!(sink.count_containing("Total bearings calculated = 0"), 1);
    }

    #[test]
    fn discarded_updates_report_zero() {
        let sink = RecordingSink::new();
        let mut report = CompletionReport::start(&sink);
        report.record_update();
        report.discard_updates();
        assert_eq!(report.finish().0, 0);
        assert_eq!(sink.count_containing("Total bearings calculated = 0"), 1);
    }

    #[test]
    fn elapsed_has_three_decimals() {
        let sink = RecordingSink::new();
        CompletionReport::start(&sink).finish();
        let timing = &sink.texts()[1];
        let secs = timing.rsplit(' ').next().unwrap();
        assert_eq!(secs.split('.').nth(1).map(str::len), Some(3), "{timing}");
    }
}
