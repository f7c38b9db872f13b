// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Plain-text report files.

use super::{
    OutputStream, ReportEntry, Reporter, TestResult, TestSetStatistics,
    console::{failure_details, set_completed_line, test_line},
};
use crate::errors::WriteReportError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
};

const RULE: &str =
    "-------------------------------------------------------------------------------";

pub(crate) fn create_reports_dir(dir: &Utf8Path) -> Result<(), WriteReportError> {
    fs::create_dir_all(dir).map_err(|err| WriteReportError::CreateDir {
        dir: dir.to_owned(),
        err,
    })
}

/// Writes `<reports>/<set>.txt` for every test set, listing failing tests with their traces.
#[derive(Debug)]
pub struct FileReporter {
    reports_dir: Utf8PathBuf,
    trim_stack_trace: bool,
    details: Vec<String>,
}

impl FileReporter {
    /// Creates a reporter writing into `reports_dir`.
    pub fn new(reports_dir: Utf8PathBuf, trim_stack_trace: bool) -> Self {
        Self {
            reports_dir,
            trim_stack_trace,
            details: Vec::new(),
        }
    }

    /// The path of the report for `test_set`.
    pub fn report_path(&self, test_set: &str) -> Utf8PathBuf {
        self.reports_dir.join(format!("{test_set}.txt"))
    }
}

impl Reporter for FileReporter {
    fn test_set_starting(&mut self, _entry: &dyn ReportEntry) -> Result<(), WriteReportError> {
        self.details.clear();
        Ok(())
    }

    fn test_finished(&mut self, result: &TestResult<'_>) -> Result<(), WriteReportError> {
        if let Some(details) = failure_details(result, self.trim_stack_trace) {
            self.details
                .push(format!("{}\n{}", test_line(result), details.trim_end()));
        }
        Ok(())
    }

    fn test_set_completed(
        &mut self,
        entry: &dyn ReportEntry,
        statistics: &TestSetStatistics,
    ) -> Result<(), WriteReportError> {
        create_reports_dir(&self.reports_dir)?;
        let path = self.report_path(entry.source_name());
        let io_err = |err| WriteReportError::Io {
            path: path.clone(),
            err,
        };

        let mut out = BufWriter::new(File::create(&path).map_err(io_err)?);
        let name = entry.source_text().unwrap_or(entry.source_name());
        writeln!(out, "{RULE}\nTest set: {name}\n{RULE}").map_err(io_err)?;
        writeln!(out, "{}", set_completed_line(entry, statistics)).map_err(io_err)?;
        for details in self.details.drain(..) {
            writeln!(out, "{details}").map_err(io_err)?;
        }
        out.flush().map_err(io_err)
    }
}

/// Writes the output of every test set to `<reports>/<set>-output.txt`.
///
/// The file is only created once the set writes something.
#[derive(Debug)]
pub struct ConsoleOutputFileReporter {
    reports_dir: Utf8PathBuf,
    current_set: Option<String>,
    file: Option<(Utf8PathBuf, BufWriter<File>)>,
}

impl ConsoleOutputFileReporter {
    /// Creates a reporter writing into `reports_dir`.
    pub fn new(reports_dir: Utf8PathBuf) -> Self {
        Self {
            reports_dir,
            current_set: None,
            file: None,
        }
    }

    /// The path of the output file for `test_set`.
    pub fn output_path(&self, test_set: &str) -> Utf8PathBuf {
        self.reports_dir.join(format!("{test_set}-output.txt"))
    }

    fn close(&mut self) -> Result<(), WriteReportError> {
        if let Some((path, mut file)) = self.file.take() {
            file.flush()
                .map_err(|err| WriteReportError::Io { path, err })?;
        }
        Ok(())
    }
}

impl Reporter for ConsoleOutputFileReporter {
    fn test_set_starting(&mut self, entry: &dyn ReportEntry) -> Result<(), WriteReportError> {
        self.close()?;
        self.current_set = Some(entry.source_name().to_owned());
        Ok(())
    }

    fn test_output(&mut self, _stream: OutputStream, text: &str) -> Result<(), WriteReportError> {
        if self.file.is_none() {
            let set = self.current_set.as_deref().unwrap_or("null");
            let path = self.output_path(set);
            create_reports_dir(&self.reports_dir)?;
            let file = File::create(&path).map_err(|err| WriteReportError::Io {
                path: path.clone(),
                err,
            })?;
            self.file = Some((path, BufWriter::new(file)));
        }
        if let Some((path, file)) = &mut self.file {
            file.write_all(text.as_bytes())
                .map_err(|err| WriteReportError::Io {
                    path: path.clone(),
                    err,
                })?;
        }
        Ok(())
    }

    fn test_finished(&mut self, _result: &TestResult<'_>) -> Result<(), WriteReportError> {
        Ok(())
    }

    fn test_set_completed(
        &mut self,
        _entry: &dyn ReportEntry,
        _statistics: &TestSetStatistics,
    ) -> Result<(), WriteReportError> {
        self.current_set = None;
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{CapturedOutput, SimpleReportEntry, TestOutcome};
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn text_report_lists_failures() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let reports = dir.path().join("reports");
        let mut reporter = FileReporter::new(reports.clone(), true);
        let set = SimpleReportEntry::test_set("org.x.ATest");
        let error = SimpleReportEntry::test("org.x.ATest", "third")
            .with_elapsed(1)
            .with_message("spawn failed");
        let output = CapturedOutput::new();

        reporter.test_set_starting(&set).expect("started");
        reporter
            .test_finished(&TestResult {
                outcome: TestOutcome::Error,
                entry: &error,
                output: &output,
                elapsed_millis: 1,
            })
            .expect("finished");
        let mut stats = TestSetStatistics::default();
        stats.record(TestOutcome::Error);
        reporter.test_set_completed(&set, &stats).expect("completed");

        let contents =
            fs::read_to_string(reports.join("org.x.ATest.txt")).expect("report written");
        assert_eq!(
            contents,
            indoc! {"
                -------------------------------------------------------------------------------
                Test set: org.x.ATest
                -------------------------------------------------------------------------------
                Tests run: 1, Failures: 0, Errors: 1, Skipped: 0, Time elapsed: 0.000 s <<< FAILURE! - in org.x.ATest
                third(org.x.ATest)  Time elapsed: 0.001 s  <<< ERROR!
                spawn failed
            "}
        );
    }

    #[test]
    fn output_file_is_created_on_first_write() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let mut reporter = ConsoleOutputFileReporter::new(dir.path().to_owned());
        let quiet = SimpleReportEntry::test_set("org.x.Quiet");
        let noisy = SimpleReportEntry::test_set("org.x.Noisy");
        let stats = TestSetStatistics::default();

        reporter.test_set_starting(&quiet).expect("started");
        reporter.test_set_completed(&quiet, &stats).expect("completed");
        reporter.test_set_starting(&noisy).expect("started");
        reporter
            .test_output(OutputStream::Stdout, "out\n")
            .expect("wrote");
        reporter
            .test_output(OutputStream::Stderr, "err\n")
            .expect("wrote");
        reporter.test_set_completed(&noisy, &stats).expect("completed");

        assert!(!reporter.output_path("org.x.Quiet").exists());
        assert_eq!(
            fs::read_to_string(reporter.output_path("org.x.Noisy")).expect("written"),
            "out\nerr\n"
        );
    }
}
