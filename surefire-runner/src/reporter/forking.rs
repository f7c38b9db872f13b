// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{OutputStream, ReportEntry, RunListener, TestCounts, TestOutcome, TestSetStatistics};
use crate::{
    channel::{EventCode, EventEncoder},
    dump::DumpWriter,
};
use std::{
    io::{self, Write},
    sync::Arc,
};

/// A [`RunListener`] inside a forked process. Every call becomes an event on the channel to the
/// parent, where a reporter manager picks it up.
pub struct ForkingRunListener<W> {
    encoder: Arc<EventEncoder<W>>,
    dump: DumpWriter,
    statistics: TestSetStatistics,
    failed: bool,
}

impl<W> std::fmt::Debug for ForkingRunListener<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkingRunListener")
            .field("encoder", &self.encoder)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl<W: Write> ForkingRunListener<W> {
    /// Creates a listener writing through `encoder`.
    pub fn new(encoder: Arc<EventEncoder<W>>, dump: DumpWriter) -> Self {
        Self {
            encoder,
            dump,
            statistics: TestSetStatistics::default(),
            failed: false,
        }
    }

    /// The tests finished through this listener so far.
    pub fn counts(&self) -> TestCounts {
        self.statistics.counts()
    }

    /// Returns true if writing to the channel failed at least once.
    pub fn channel_failed(&self) -> bool {
        self.failed
    }

    fn check(&mut self, result: io::Result<()>) {
        if let Err(error) = result {
            // Only the first failure is interesting; the rest repeat it.
            if !self.failed {
                self.failed = true;
                self.dump
                    .dump_stream_exception(Some("failed to write to the event channel"), &error);
            }
        }
    }

    fn entry(&mut self, code: EventCode, entry: &dyn ReportEntry) {
        let result = self.encoder.entry(code, entry);
        self.check(result);
    }
}

impl<W: Write + Send> RunListener for ForkingRunListener<W> {
    fn test_set_starting(&mut self, entry: &dyn ReportEntry) {
        self.entry(EventCode::TestSetStarting, entry);
    }

    fn test_set_completed(&mut self, entry: &dyn ReportEntry) {
        self.entry(EventCode::TestSetCompleted, entry);
    }

    fn test_starting(&mut self, entry: &dyn ReportEntry) {
        self.entry(EventCode::TestStarting, entry);
    }

    fn test_finished(&mut self, outcome: TestOutcome, entry: &dyn ReportEntry) {
        let code = match outcome {
            TestOutcome::Succeeded => EventCode::TestSucceeded,
            TestOutcome::Failed => EventCode::TestFailed,
            TestOutcome::Error => EventCode::TestError,
            TestOutcome::Skipped => EventCode::TestSkipped,
            TestOutcome::AssumptionFailure => EventCode::TestAssumptionFailure,
        };
        self.statistics.record(outcome);
        self.entry(code, entry);
    }

    fn write_test_output(&mut self, stream: OutputStream, text: &str) {
        let result = self.encoder.output(stream.is_stdout(), text);
        self.check(result);
    }

    fn test_execution_skipped_by_user(&mut self) {
        let result = self.encoder.stop_on_next_test();
        self.check(result);
    }

    fn info(&mut self, message: &str) {
        let result = self.encoder.console(message);
        self.check(result);
    }

    fn warning(&mut self, message: &str) {
        let result = self.encoder.warning(message);
        self.check(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::Event,
        reporter::{SimpleReportEntry, test_helpers::SharedBuffer},
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn lifecycle_becomes_events() {
        let buffer = SharedBuffer::default();
        let encoder = Arc::new(EventEncoder::new(buffer.clone(), 3));
        let mut listener = ForkingRunListener::new(encoder, DumpWriter::disabled());

        let set = SimpleReportEntry::test_set("org.x.ATest");
        let test = SimpleReportEntry::test("org.x.ATest", "first").with_elapsed(4);
        listener.test_set_starting(&set);
        listener.test_starting(&test);
        listener.write_test_output(OutputStream::Stdout, "a,b\n");
        listener.test_assumption_failure(&test);
        listener.test_execution_skipped_by_user();
        listener.warning("careful");
        listener.test_set_completed(&set);

        let contents = buffer.contents();
        let events: Vec<_> = contents
            .lines()
            .map(|line| Event::parse_line(line).expect("valid event"))
            .collect();
        assert!(events.iter().all(|(channel, _)| *channel == 3));
        let codes: Vec<_> = events.iter().map(|(_, event)| event.code()).collect();
        assert_eq!(
            codes,
            vec![
                EventCode::TestSetStarting,
                EventCode::TestStarting,
                EventCode::StdOut,
                EventCode::TestAssumptionFailure,
                EventCode::StopOnNextTest,
                EventCode::Warning,
                EventCode::TestSetCompleted,
            ]
        );
        match &events[2].1 {
            Event::StdOut(text) => assert_eq!(text, "a,b\n"),
            other => panic!("unexpected event {other:?}"),
        }
        match &events[3].1 {
            Event::Entry { entry, .. } => {
                assert_eq!(entry.test_id(), "org.x.ATest.first");
                assert_eq!(entry.elapsed(), Some(4));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(listener.counts().completed, 1);
        assert_eq!(listener.counts().skipped, 1);
        assert!(!listener.channel_failed());
    }
}
