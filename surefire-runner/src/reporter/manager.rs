// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{
    CapturedOutput, OutputStream, Recorded, ReportEntry, Reporter, RunListener, RunStatistics,
    TestOutcome, TestResult, TestSetStatistics,
};
use crate::{
    errors::{DisplayErrorChain, WriteReportError},
    time::{StopwatchStart, stopwatch},
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::Duration,
};
use surefire_metadata::RunHistory;
use tracing::{debug, info, warn};

/// A reporter together with the name it was registered under.
pub(crate) struct NamedReporter {
    pub(crate) name: String,
    pub(crate) reporter: Box<dyn Reporter>,
}

struct CurrentTest {
    output: CapturedOutput,
    stopwatch: StopwatchStart,
}

struct CurrentTestSet {
    statistics: TestSetStatistics,
    stopwatch: StopwatchStart,
}

/// Fans test events out to reporters and keeps statistics. One per execution context.
///
/// The manager owns the output capture of the current test. The capture is taken out of the
/// manager before reporters see the finished test, so it never outlives the test even if a
/// reporter fails.
pub struct ReporterManager {
    reporters: Vec<NamedReporter>,
    statistics: Arc<RunStatistics>,
    history: Option<Arc<Mutex<RunHistory>>>,
    current_set: Option<CurrentTestSet>,
    current_test: Option<CurrentTest>,
    skipped_by_user: bool,
}

impl std::fmt::Debug for ReporterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReporterManager")
            .field(
                "reporters",
                &self.reporters.iter().map(|r| &r.name).collect::<Vec<_>>(),
            )
            .field("statistics", &self.statistics)
            .finish_non_exhaustive()
    }
}

impl ReporterManager {
    pub(crate) fn new(reporters: Vec<NamedReporter>, statistics: Arc<RunStatistics>) -> Self {
        Self {
            reporters,
            statistics,
            history: None,
            current_set: None,
            current_test: None,
            skipped_by_user: false,
        }
    }

    /// Records every completed test set into `history`.
    pub(crate) fn with_history(mut self, history: Arc<Mutex<RunHistory>>) -> Self {
        self.history = Some(history);
        self
    }

    /// The statistics this manager reports into.
    pub fn statistics(&self) -> &Arc<RunStatistics> {
        &self.statistics
    }

    /// Returns true once the remaining tests were skipped because of a skip request.
    pub fn was_skipped_by_user(&self) -> bool {
        self.skipped_by_user
    }

    fn fan_out(
        &mut self,
        event: &'static str,
        mut f: impl FnMut(&mut dyn Reporter) -> Result<(), WriteReportError>,
    ) {
        for NamedReporter { name, reporter } in &mut self.reporters {
            match panic::catch_unwind(AssertUnwindSafe(|| f(reporter.as_mut()))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(
                        reporter = %name,
                        event,
                        "reporter failed: {}",
                        DisplayErrorChain::new(&error),
                    );
                }
                Err(_) => {
                    warn!(reporter = %name, event, "reporter panicked");
                }
            }
        }
    }
}

impl RunListener for ReporterManager {
    fn test_set_starting(&mut self, entry: &dyn ReportEntry) {
        self.current_set = Some(CurrentTestSet {
            statistics: TestSetStatistics::default(),
            stopwatch: stopwatch(),
        });
        self.fan_out("test-set-starting", |r| r.test_set_starting(entry));
    }

    fn test_set_completed(&mut self, entry: &dyn ReportEntry) {
        let statistics = match self.current_set.take() {
            Some(CurrentTestSet {
                mut statistics,
                stopwatch,
            }) => {
                let elapsed = entry
                    .elapsed()
                    .map_or_else(|| stopwatch.snapshot().duration, Duration::from_millis);
                statistics.set_elapsed(elapsed);
                statistics
            }
            None => {
                debug!(
                    test_set = entry.source_name(),
                    "test set completed without starting"
                );
                TestSetStatistics::default()
            }
        };
        self.statistics.add(statistics.counts());
        if let Some(history) = &self.history {
            let counts = statistics.counts();
            history.lock().unwrap_or_else(|e| e.into_inner()).record(
                entry.source_name(),
                counts.failures == 0 && counts.errors == 0,
                u64::try_from(statistics.elapsed().as_millis()).unwrap_or(u64::MAX),
            );
        }
        self.fan_out("test-set-completed", |r| {
            r.test_set_completed(entry, &statistics)
        });
    }

    fn test_starting(&mut self, entry: &dyn ReportEntry) {
        self.current_test = Some(CurrentTest {
            output: CapturedOutput::new(),
            stopwatch: stopwatch(),
        });
        self.fan_out("test-starting", |r| r.test_starting(entry));
    }

    fn test_finished(&mut self, outcome: TestOutcome, entry: &dyn ReportEntry) {
        // Tear the capture down before anything else can fail.
        let current = self.current_test.take();
        let (output, measured) = match current {
            Some(current) => (
                current.output,
                current.stopwatch.snapshot().elapsed_millis(),
            ),
            None => (CapturedOutput::new(), 0),
        };

        let test_id = entry.test_id();
        let recorded = match &mut self.current_set {
            Some(set) => set.statistics.record_test(&test_id, outcome),
            None => {
                let mut statistics = TestSetStatistics::default();
                let recorded = statistics.record_test(&test_id, outcome);
                self.statistics.add(statistics.counts());
                recorded
            }
        };
        match (recorded, outcome) {
            (Recorded::New, TestOutcome::Failed) => self.statistics.add_failure_source(test_id),
            (Recorded::New, TestOutcome::Error) => self.statistics.add_error_source(test_id),
            (Recorded::Flake(_), _) => self.statistics.add_flake_source(test_id),
            _ => {}
        }

        let result = TestResult {
            outcome,
            entry,
            output: &output,
            elapsed_millis: entry.elapsed_or(measured),
        };
        self.fan_out("test-finished", |r| r.test_finished(&result));
    }

    fn write_test_output(&mut self, stream: OutputStream, text: &str) {
        if let Some(current) = &mut self.current_test {
            current.output.append(stream, text);
        }
        self.fan_out("test-output", |r| r.test_output(stream, text));
    }

    fn test_execution_skipped_by_user(&mut self) {
        self.skipped_by_user = true;
    }

    fn info(&mut self, message: &str) {
        info!("{message}");
    }

    fn warning(&mut self, message: &str) {
        warn!("{message}");
    }
}
