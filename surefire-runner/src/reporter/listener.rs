// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{CapturedOutput, OutputStream, ReportEntry, TestOutcome, TestSetStatistics};
use crate::errors::WriteReportError;

/// Receives the lifecycle of tests from a provider.
///
/// One listener belongs to one execution context: at most one test is current at a time. Test
/// output written between `test_starting` and the matching outcome belongs to that test.
pub trait RunListener: Send {
    /// A test set is about to run.
    fn test_set_starting(&mut self, entry: &dyn ReportEntry);

    /// A test set finished.
    fn test_set_completed(&mut self, entry: &dyn ReportEntry);

    /// A test is about to run.
    fn test_starting(&mut self, entry: &dyn ReportEntry);

    /// The current test finished with `outcome`.
    fn test_finished(&mut self, outcome: TestOutcome, entry: &dyn ReportEntry);

    /// Output written by the current test.
    fn write_test_output(&mut self, stream: OutputStream, text: &str);

    /// The remaining tests won't run because of a skip-after-failure request.
    fn test_execution_skipped_by_user(&mut self);

    /// An informational message for the console.
    fn info(&mut self, message: &str);

    /// A warning for the console.
    fn warning(&mut self, message: &str);

    /// The current test passed.
    fn test_succeeded(&mut self, entry: &dyn ReportEntry) {
        self.test_finished(TestOutcome::Succeeded, entry);
    }

    /// An assertion in the current test failed.
    fn test_failed(&mut self, entry: &dyn ReportEntry) {
        self.test_finished(TestOutcome::Failed, entry);
    }

    /// The current test errored.
    fn test_error(&mut self, entry: &dyn ReportEntry) {
        self.test_finished(TestOutcome::Error, entry);
    }

    /// The current test was skipped.
    fn test_skipped(&mut self, entry: &dyn ReportEntry) {
        self.test_finished(TestOutcome::Skipped, entry);
    }

    /// An assumption of the current test didn't hold.
    fn test_assumption_failure(&mut self, entry: &dyn ReportEntry) {
        self.test_finished(TestOutcome::AssumptionFailure, entry);
    }
}

/// A finished test, as seen by reporters.
#[derive(Clone, Copy, Debug)]
pub struct TestResult<'a> {
    /// How the test ended.
    pub outcome: TestOutcome,

    /// The entry describing the test.
    pub entry: &'a dyn ReportEntry,

    /// Output the test wrote.
    pub output: &'a CapturedOutput,

    /// How long the test took, in milliseconds.
    pub elapsed_millis: u64,
}

/// Writes test results in one format.
///
/// The reporter manager calls every reporter in registration order. A reporter that fails or
/// panics doesn't keep the others from receiving the event.
pub trait Reporter: Send {
    /// A test set is about to run.
    fn test_set_starting(&mut self, entry: &dyn ReportEntry) -> Result<(), WriteReportError> {
        let _ = entry;
        Ok(())
    }

    /// A test is about to run.
    fn test_starting(&mut self, entry: &dyn ReportEntry) -> Result<(), WriteReportError> {
        let _ = entry;
        Ok(())
    }

    /// The current test wrote output.
    fn test_output(&mut self, stream: OutputStream, text: &str) -> Result<(), WriteReportError> {
        let _ = (stream, text);
        Ok(())
    }

    /// A test finished.
    fn test_finished(&mut self, result: &TestResult<'_>) -> Result<(), WriteReportError>;

    /// A test set finished.
    fn test_set_completed(
        &mut self,
        entry: &dyn ReportEntry,
        statistics: &TestSetStatistics,
    ) -> Result<(), WriteReportError>;
}
