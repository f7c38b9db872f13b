// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! JUnit XML reports, one file per test set.

use super::{
    ReportEntry, Reporter, TestOutcome, TestResult, TestSetStatistics, file::create_reports_dir,
};
use crate::{
    errors::WriteReportError,
    time::{StopwatchStart, stopwatch},
};
use camino::Utf8PathBuf;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestRerun, TestSuite};
use std::{fs::File, time::Duration};

/// Writes `<reports>/TEST-<set>.xml` for every test set.
///
/// A test reported again after failing is a rerun: the earlier runs are kept as rerun elements
/// of the last one, which makes a test that finally passed show up as flaky.
#[derive(Debug)]
pub struct XmlReporter {
    reports_dir: Utf8PathBuf,
    trim_stack_trace: bool,
    current: Option<(TestSuite, StopwatchStart)>,
    cases: Vec<PendingCase>,
}

#[derive(Debug)]
struct PendingCase {
    name: String,
    case: TestCase,
    /// This run as a rerun element, if it didn't pass.
    as_rerun: Option<TestRerun>,
    earlier_runs: Vec<TestRerun>,
}

impl XmlReporter {
    /// Creates a reporter writing into `reports_dir`.
    pub fn new(reports_dir: Utf8PathBuf, trim_stack_trace: bool) -> Self {
        Self {
            reports_dir,
            trim_stack_trace,
            current: None,
            cases: Vec::new(),
        }
    }

    /// The path of the report for `test_set`.
    pub fn report_path(&self, test_set: &str) -> Utf8PathBuf {
        self.reports_dir.join(format!("TEST-{test_set}.xml"))
    }

    fn message_and_description(
        &self,
        result: &TestResult<'_>,
    ) -> (Option<String>, Option<String>) {
        let entry = result.entry;
        let trace = entry.stack_trace_writer();
        let message = entry.message().or_else(|| trace.and_then(|t| t.message()));
        let description = trace.map(|t| {
            if self.trim_stack_trace {
                t.trimmed_trace()
            } else {
                t.full_trace().to_owned()
            }
        });
        (message.map(str::to_owned), description)
    }

    fn status(&self, result: &TestResult<'_>) -> TestCaseStatus {
        let mut status = match result.outcome {
            TestOutcome::Succeeded => return TestCaseStatus::success(),
            TestOutcome::Skipped | TestOutcome::AssumptionFailure => TestCaseStatus::skipped(),
            TestOutcome::Failed => TestCaseStatus::non_success(NonSuccessKind::Failure),
            TestOutcome::Error => TestCaseStatus::non_success(NonSuccessKind::Error),
        };
        let (message, description) = self.message_and_description(result);
        if let Some(message) = message {
            status.set_message(message);
        }
        if let Some(description) = description {
            status.set_description(description);
        }
        status
    }

    fn as_rerun(&self, result: &TestResult<'_>) -> Option<TestRerun> {
        let kind = match result.outcome {
            TestOutcome::Failed => NonSuccessKind::Failure,
            TestOutcome::Error => NonSuccessKind::Error,
            _ => return None,
        };
        let mut rerun = TestRerun::new(kind);
        rerun.set_time(Duration::from_millis(result.elapsed_millis));
        let (message, description) = self.message_and_description(result);
        if let Some(message) = message {
            rerun.set_message(message);
        }
        if let Some(description) = description {
            rerun.set_description(description);
        }
        if !result.output.stdout().is_empty() {
            rerun.set_system_out(result.output.stdout());
        }
        if !result.output.stderr().is_empty() {
            rerun.set_system_err(result.output.stderr());
        }
        Some(rerun)
    }
}

impl Reporter for XmlReporter {
    fn test_set_starting(&mut self, entry: &dyn ReportEntry) -> Result<(), WriteReportError> {
        self.current = Some((TestSuite::new(entry.source_name()), stopwatch()));
        self.cases.clear();
        Ok(())
    }

    fn test_finished(&mut self, result: &TestResult<'_>) -> Result<(), WriteReportError> {
        if self.current.is_none() {
            return Ok(());
        }
        let status = self.status(result);
        let as_rerun = self.as_rerun(result);

        let entry = result.entry;
        let name = entry
            .name_text()
            .or(entry.name())
            .unwrap_or(entry.source_name());
        let mut test_case = TestCase::new(name, status);
        test_case
            .set_classname(entry.source_name())
            .set_time(Duration::from_millis(result.elapsed_millis));
        if !result.output.stdout().is_empty() {
            test_case.set_system_out(result.output.stdout());
        }
        if !result.output.stderr().is_empty() {
            test_case.set_system_err(result.output.stderr());
        }

        let pending = PendingCase {
            name: name.to_owned(),
            case: test_case,
            as_rerun,
            earlier_runs: Vec::new(),
        };
        let earlier = self
            .cases
            .iter()
            .rposition(|c| c.name == name && c.as_rerun.is_some());
        match earlier {
            Some(index) => {
                let earlier = std::mem::replace(&mut self.cases[index], pending);
                let current = &mut self.cases[index];
                current.earlier_runs = earlier.earlier_runs;
                current.earlier_runs.extend(earlier.as_rerun);
            }
            None => self.cases.push(pending),
        }
        Ok(())
    }

    fn test_set_completed(
        &mut self,
        entry: &dyn ReportEntry,
        statistics: &TestSetStatistics,
    ) -> Result<(), WriteReportError> {
        let Some((mut suite, watch)) = self.current.take() else {
            return Ok(());
        };
        for PendingCase {
            mut case,
            earlier_runs,
            ..
        } in self.cases.drain(..)
        {
            for rerun in earlier_runs {
                case.status.add_rerun(rerun);
            }
            suite.add_test_case(case);
        }
        let started = watch.start_time();
        suite
            .set_timestamp(started)
            .set_time(statistics.elapsed());
        for (key, value) in entry.system_properties() {
            suite.add_property((key.as_str(), value.as_str()));
        }

        let mut report = Report::new(entry.source_name());
        report
            .set_timestamp(started)
            .set_time(statistics.elapsed())
            .add_test_suite(suite);

        create_reports_dir(&self.reports_dir)?;
        let path = self.report_path(entry.source_name());
        let file = File::create(&path).map_err(|err| WriteReportError::Io {
            path: path.clone(),
            err,
        })?;
        report
            .serialize(file)
            .map_err(|err| WriteReportError::Junit { path, err })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{CapturedOutput, OutputStream, SimpleReportEntry, StackTraceWriter};
    use camino_tempfile::Utf8TempDir;
    use indexmap::IndexMap;
    use std::fs;

    #[test]
    fn writes_one_file_per_set() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let mut reporter = XmlReporter::new(dir.path().to_owned(), true);
        let mut properties = IndexMap::new();
        properties.insert("user.language".to_owned(), "en".to_owned());
        let set = SimpleReportEntry::test_set("org.x.ATest").with_system_properties(properties);

        reporter.test_set_starting(&set).expect("started");

        let mut output = CapturedOutput::new();
        output.append(OutputStream::Stdout, "hello from first\n");
        let first = SimpleReportEntry::test("org.x.ATest", "first");
        reporter
            .test_finished(&TestResult {
                outcome: TestOutcome::Succeeded,
                entry: &first,
                output: &output,
                elapsed_millis: 5,
            })
            .expect("finished");

        let second = SimpleReportEntry::test("org.x.ATest", "second").with_stack_trace(
            StackTraceWriter::new(
                Some("org.x.ATest".to_owned()),
                Some("expected 1".to_owned()),
                "expected 1\n    at org.x.ATest.second".to_owned(),
            ),
        );
        let empty = CapturedOutput::new();
        reporter
            .test_finished(&TestResult {
                outcome: TestOutcome::Failed,
                entry: &second,
                output: &empty,
                elapsed_millis: 7,
            })
            .expect("finished");

        let mut stats = TestSetStatistics::default();
        stats.record(TestOutcome::Succeeded);
        stats.record(TestOutcome::Failed);
        reporter.test_set_completed(&set, &stats).expect("completed");

        let xml = fs::read_to_string(reporter.report_path("org.x.ATest")).expect("report written");
        assert!(xml.contains(r#"tests="2""#), "{xml}");
        assert!(xml.contains(r#"failures="1""#), "{xml}");
        assert!(xml.contains(r#"name="second""#), "{xml}");
        assert!(xml.contains(r#"classname="org.x.ATest""#), "{xml}");
        assert!(xml.contains(r#"message="expected 1""#), "{xml}");
        assert!(xml.contains("hello from first"), "{xml}");
        assert!(xml.contains(r#"name="user.language""#), "{xml}");
    }

    #[test]
    fn reruns_are_nested_in_the_last_run() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let mut reporter = XmlReporter::new(dir.path().to_owned(), false);
        let set = SimpleReportEntry::test_set("org.x.RerunTest");
        reporter.test_set_starting(&set).expect("started");

        let flaky = SimpleReportEntry::test("org.x.RerunTest", "flaky");
        let failed = flaky.clone().with_message("first run failed");
        let output = CapturedOutput::new();
        let mut stats = TestSetStatistics::default();
        for (outcome, entry) in [
            (TestOutcome::Failed, &failed),
            (TestOutcome::Succeeded, &flaky),
        ] {
            reporter
                .test_finished(&TestResult {
                    outcome,
                    entry,
                    output: &output,
                    elapsed_millis: 3,
                })
                .expect("finished");
            stats.record_test("org.x.RerunTest.flaky", outcome);
        }
        reporter.test_set_completed(&set, &stats).expect("completed");

        let xml =
            fs::read_to_string(reporter.report_path("org.x.RerunTest")).expect("report written");
        assert_eq!(xml.matches("<testcase ").count(), 1, "{xml}");
        assert!(xml.contains("<flakyFailure"), "{xml}");
        assert!(xml.contains("first run failed"), "{xml}");
        assert!(!xml.contains("<failure"), "{xml}");
    }
}
