// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Counters for test sets and whole runs.

use std::{
    collections::HashMap,
    ops::{Add, AddAssign},
    sync::Mutex,
    time::Duration,
};
use surefire_metadata::{RunSummary, SurefireExitCode};

/// Test counts. Merging with `+` is associative and commutative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TestCounts {
    /// Tests that ran, whatever their outcome.
    pub completed: usize,
    /// Tests that errored.
    pub errors: usize,
    /// Tests that failed.
    pub failures: usize,
    /// Tests that were skipped.
    pub skipped: usize,
    /// Tests that failed and then passed on a rerun.
    pub flakes: usize,
}

impl TestCounts {
    /// Returns true if any test failed or errored.
    pub fn has_failures(&self) -> bool {
        self.errors > 0 || self.failures > 0
    }
}

impl Add for TestCounts {
    type Output = TestCounts;

    fn add(self, other: TestCounts) -> TestCounts {
        TestCounts {
            completed: self.completed + other.completed,
            errors: self.errors + other.errors,
            failures: self.failures + other.failures,
            skipped: self.skipped + other.skipped,
            flakes: self.flakes + other.flakes,
        }
    }
}

impl AddAssign for TestCounts {
    fn add_assign(&mut self, other: TestCounts) {
        *self = *self + other;
    }
}

/// The outcome of a single test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TestOutcome {
    /// The test passed.
    Succeeded,
    /// An assertion in the test failed.
    Failed,
    /// The test errored for a reason other than a failed assertion.
    Error,
    /// The test was skipped.
    Skipped,
    /// An assumption didn't hold; counted as skipped.
    AssumptionFailure,
}

impl TestOutcome {
    /// Returns the marker text reporters print next to offending tests.
    pub fn marker(self) -> Option<&'static str> {
        match self {
            Self::Failed => Some("<<< FAILURE!"),
            Self::Error => Some("<<< ERROR!"),
            Self::Succeeded | Self::Skipped | Self::AssumptionFailure => None,
        }
    }

    /// Returns true for outcomes counted as skipped.
    pub fn is_skipped(self) -> bool {
        matches!(self, Self::Skipped | Self::AssumptionFailure)
    }
}

/// How a test outcome was merged into the statistics of its set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recorded {
    /// The first run of a test.
    New,
    /// Another run of a test that already failed in this set, which didn't pass either.
    Rerun,
    /// A passing run of a test that failed earlier in this set. Carries the earlier outcome.
    Flake(TestOutcome),
}

/// Statistics for one test set.
///
/// Reruns of a failing test are merged into its first run: the test is counted once, as a
/// failure or error if no run passed and as a flake otherwise.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestSetStatistics {
    counts: TestCounts,
    elapsed: Duration,
    failing: HashMap<String, TestOutcome>,
}

impl TestSetStatistics {
    /// Records an outcome of the test `test_id`, merging it with earlier runs of that test.
    pub fn record_test(&mut self, test_id: &str, outcome: TestOutcome) -> Recorded {
        if let Some(&previous) = self.failing.get(test_id) {
            if outcome != TestOutcome::Succeeded {
                return Recorded::Rerun;
            }
            self.failing.remove(test_id);
            match previous {
                TestOutcome::Failed => {
                    self.counts.failures = self.counts.failures.saturating_sub(1);
                }
                TestOutcome::Error => {
                    self.counts.errors = self.counts.errors.saturating_sub(1);
                }
                _ => {}
            }
            self.counts.flakes += 1;
            return Recorded::Flake(previous);
        }

        self.record(outcome);
        if matches!(outcome, TestOutcome::Failed | TestOutcome::Error) {
            self.failing.insert(test_id.to_owned(), outcome);
        }
        Recorded::New
    }

    /// Records one test outcome without merging reruns.
    pub fn record(&mut self, outcome: TestOutcome) {
        self.counts.completed += 1;
        match outcome {
            TestOutcome::Succeeded => {}
            TestOutcome::Failed => self.counts.failures += 1,
            TestOutcome::Error => self.counts.errors += 1,
            TestOutcome::Skipped | TestOutcome::AssumptionFailure => self.counts.skipped += 1,
        }
    }

    /// Sets the elapsed time of the set.
    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    /// The counts.
    pub fn counts(&self) -> TestCounts {
        self.counts
    }

    /// The elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Formats the summary line printed when a set completes.
    pub fn summary_line(&self) -> String {
        let TestCounts {
            completed,
            errors,
            failures,
            skipped,
            ..
        } = self.counts;
        format!(
            "Tests run: {completed}, Failures: {failures}, Errors: {errors}, Skipped: {skipped}, \
             Time elapsed: {} s",
            crate::helpers::elapsed_secs(self.elapsed)
        )
    }
}

/// The merged outcome of a run, or of one fork of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Test counts.
    pub counts: TestCounts,
    /// Whether a fork timed out.
    pub timeout: bool,
    /// A failure outside individual tests, e.g. a crashed fork.
    pub failure: Option<String>,
    /// Identifiers of failed tests, in order.
    pub failure_sources: Vec<String>,
    /// Identifiers of errored tests, in order.
    pub error_sources: Vec<String>,
    /// Identifiers of tests that passed on a rerun, in order.
    pub flake_sources: Vec<String>,
}

impl RunResult {
    /// A result for a run that stopped before reporting any tests.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Default::default()
        }
    }

    /// A result for a run that timed out.
    pub fn timeout(counts: TestCounts) -> Self {
        Self {
            counts,
            timeout: true,
            ..Default::default()
        }
    }

    /// Merges two results. Associative: counts and sources are concatenated, the timeout flag
    /// is or-ed and the first failure message wins.
    pub fn aggregate(&self, other: &RunResult) -> RunResult {
        RunResult {
            counts: self.counts + other.counts,
            timeout: self.timeout || other.timeout,
            failure: self.failure.clone().or_else(|| other.failure.clone()),
            failure_sources: [&self.failure_sources[..], &other.failure_sources[..]].concat(),
            error_sources: [&self.error_sources[..], &other.error_sources[..]].concat(),
            flake_sources: [&self.flake_sources[..], &other.flake_sources[..]].concat(),
        }
    }

    /// Returns true if nothing went wrong.
    pub fn is_success(&self) -> bool {
        !self.counts.has_failures() && !self.timeout && self.failure.is_none()
    }

    /// The process exit code for this result.
    pub fn exit_code(&self, fail_if_no_tests: bool) -> i32 {
        if self.failure.is_some() || self.timeout {
            return SurefireExitCode::FAILURE;
        }
        SurefireExitCode::for_run(
            self.counts.completed,
            self.counts.errors,
            self.counts.failures,
            fail_if_no_tests,
        )
    }

    /// Converts this result into the serializable summary.
    pub fn to_summary(&self) -> RunSummary {
        RunSummary {
            completed: self.counts.completed,
            errors: self.counts.errors,
            failures: self.counts.failures,
            skipped: self.counts.skipped,
            flakes: self.counts.flakes,
            timeout: self.timeout,
            failure: self.failure.clone(),
            failed_tests: self
                .failure_sources
                .iter()
                .chain(&self.error_sources)
                .cloned()
                .collect(),
            flaky_tests: self.flake_sources.clone(),
        }
    }
}

/// Statistics for a whole run, updated concurrently by every reporter of that run.
#[derive(Debug, Default)]
pub struct RunStatistics {
    inner: Mutex<RunResult>,
}

impl RunStatistics {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the counts of a completed test set.
    pub fn add(&self, counts: TestCounts) {
        self.lock().counts += counts;
    }

    /// Records a failed test.
    pub fn add_failure_source(&self, test_id: impl Into<String>) {
        self.lock().failure_sources.push(test_id.into());
    }

    /// Records an errored test.
    pub fn add_error_source(&self, test_id: impl Into<String>) {
        self.lock().error_sources.push(test_id.into());
    }

    /// Records a test that passed on a rerun, dropping it from the failed and errored tests.
    pub fn add_flake_source(&self, test_id: impl Into<String>) {
        let test_id = test_id.into();
        let mut inner = self.lock();
        inner.failure_sources.retain(|source| *source != test_id);
        inner.error_sources.retain(|source| *source != test_id);
        inner.flake_sources.push(test_id);
    }

    /// The counts so far.
    pub fn counts(&self) -> TestCounts {
        self.lock().counts
    }

    /// The number of failed or errored tests so far, including tests of sets still running.
    pub fn failure_count(&self) -> usize {
        let inner = self.lock();
        inner.failure_sources.len() + inner.error_sources.len()
    }

    /// The failed tests so far.
    pub fn failure_sources(&self) -> Vec<String> {
        self.lock().failure_sources.clone()
    }

    /// The errored tests so far.
    pub fn error_sources(&self) -> Vec<String> {
        self.lock().error_sources.clone()
    }

    /// The tests that passed on a rerun so far.
    pub fn flake_sources(&self) -> Vec<String> {
        self.lock().flake_sources.clone()
    }

    /// A snapshot of the statistics.
    pub fn to_run_result(&self) -> RunResult {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunResult> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
