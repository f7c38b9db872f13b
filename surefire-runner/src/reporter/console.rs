// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Console reporters.

use super::{OutputStream, ReportEntry, Reporter, TestResult, TestSetStatistics};
use crate::{errors::WriteReportError, helpers::elapsed_millis_secs};
use owo_colors::{OwoColorize, Style};
use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex},
};

/// A shared handle to the terminal, or whatever stands in for it.
///
/// Lines are written whole, so output from several reporters never tears.
#[derive(Clone)]
pub struct ConsoleWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
    styles: Arc<Styles>,
}

impl fmt::Debug for ConsoleWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleWriter")
            .field("styles", &self.styles)
            .finish_non_exhaustive()
    }
}

impl ConsoleWriter {
    /// Writes to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Writes to standard error.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Writes to `writer`.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
            styles: Arc::new(Styles::default()),
        }
    }

    /// Enables colors.
    pub fn colorize(mut self) -> Self {
        let mut styles = Styles::default();
        styles.colorize();
        self.styles = Arc::new(styles);
        self
    }

    /// Writes one or more lines. A trailing newline is added if missing.
    pub fn write_lines(&self, text: &str) -> io::Result<()> {
        let mut writer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    /// Writes text as is.
    pub fn write_raw(&self, text: &str) -> io::Result<()> {
        let mut writer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(text.as_bytes())?;
        writer.flush()
    }

    pub(crate) fn styles(&self) -> &Styles {
        &self.styles
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Styles {
    pub(crate) header: Style,
    pub(crate) pass: Style,
    pub(crate) fail: Style,
    pub(crate) skip: Style,
    pub(crate) count: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.header = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.count = Style::new().bold();
    }
}

const SEPARATOR: &str = "-------------------------------------------------------";

pub(crate) fn run_header() -> String {
    format!("\n{SEPARATOR}\n T E S T S\n{SEPARATOR}")
}

/// `test(Class)  Time elapsed: 0.010 s  <<< FAILURE!`
pub(crate) fn test_line(result: &TestResult<'_>) -> String {
    let entry = result.entry;
    let name = match entry.name_text().or(entry.name()) {
        Some(name) => format!("{name}({})", entry.source_text().unwrap_or(entry.source_name())),
        None => entry.source_text().unwrap_or(entry.source_name()).to_owned(),
    };
    let mut line = format!(
        "{name}  Time elapsed: {} s",
        elapsed_millis_secs(result.elapsed_millis)
    );
    if let Some(marker) = result.outcome.marker() {
        line.push_str("  ");
        line.push_str(marker);
    }
    line
}

/// `Tests run: ..., Time elapsed: ... s <<< FAILURE! - in org.x.ATest`
pub(crate) fn set_completed_line(entry: &dyn ReportEntry, stats: &TestSetStatistics) -> String {
    let failure = if stats.counts().has_failures() {
        " <<< FAILURE!"
    } else {
        ""
    };
    format!(
        "{}{failure} - in {}",
        stats.summary_line(),
        entry.source_text().unwrap_or(entry.source_name())
    )
}

/// The stack trace to print for a failed test.
pub(crate) fn failure_details(result: &TestResult<'_>, trim_stack_trace: bool) -> Option<String> {
    result.outcome.marker()?;
    let entry = result.entry;
    match entry.stack_trace_writer() {
        Some(trace) if trim_stack_trace => Some(trace.trimmed_trace()),
        Some(trace) => Some(trace.full_trace().to_owned()),
        None => entry.message().map(str::to_owned),
    }
}

/// Prints test sets and failing tests to the console.
///
/// The brief flavor prints one line per test set plus details of failing tests. The detailed
/// flavor prints every test.
#[derive(Debug)]
pub struct ConsoleReporter {
    console: ConsoleWriter,
    detailed: bool,
    trim_stack_trace: bool,
    pending: Vec<String>,
}

impl ConsoleReporter {
    /// Creates a console reporter.
    pub fn new(console: ConsoleWriter, detailed: bool, trim_stack_trace: bool) -> Self {
        Self {
            console,
            detailed,
            trim_stack_trace,
            pending: Vec::new(),
        }
    }

    fn write(&self, text: &str) -> Result<(), WriteReportError> {
        self.console
            .write_lines(text)
            .map_err(WriteReportError::Console)
    }
}

impl Reporter for ConsoleReporter {
    fn test_set_starting(&mut self, entry: &dyn ReportEntry) -> Result<(), WriteReportError> {
        self.pending.clear();
        let name = entry.name_with_group();
        self.write(&format!(
            "{} {}",
            "Running".style(self.console.styles().header),
            if name.is_empty() {
                entry.source_name().to_owned()
            } else {
                name
            }
        ))
    }

    fn test_finished(&mut self, result: &TestResult<'_>) -> Result<(), WriteReportError> {
        let details = failure_details(result, self.trim_stack_trace);
        if !self.detailed && details.is_none() {
            return Ok(());
        }

        let styles = self.console.styles();
        let style = match result.outcome.marker() {
            Some(_) => styles.fail,
            None if result.outcome.is_skipped() => styles.skip,
            None => styles.pass,
        };
        let mut text = test_line(result).style(style).to_string();
        if let Some(details) = details {
            text.push('\n');
            text.push_str(details.trim_end());
        }

        if self.detailed {
            self.write(&text)
        } else {
            self.pending.push(text);
            Ok(())
        }
    }

    fn test_set_completed(
        &mut self,
        entry: &dyn ReportEntry,
        statistics: &TestSetStatistics,
    ) -> Result<(), WriteReportError> {
        let styles = self.console.styles();
        let style = if statistics.counts().has_failures() {
            styles.fail
        } else {
            styles.count
        };
        let mut text = set_completed_line(entry, statistics)
            .style(style)
            .to_string();
        for pending in self.pending.drain(..) {
            text.push('\n');
            text.push_str(&pending);
        }
        self.write(&text)
    }
}

/// Echoes test output to the console as it's written.
#[derive(Debug)]
pub struct ConsoleOutputEcho {
    console: ConsoleWriter,
}

impl ConsoleOutputEcho {
    /// Creates an echo to `console`.
    pub fn new(console: ConsoleWriter) -> Self {
        Self { console }
    }
}

impl Reporter for ConsoleOutputEcho {
    fn test_output(&mut self, _stream: OutputStream, text: &str) -> Result<(), WriteReportError> {
        self.console
            .write_raw(text)
            .map_err(WriteReportError::Console)
    }

    fn test_finished(&mut self, _result: &TestResult<'_>) -> Result<(), WriteReportError> {
        Ok(())
    }

    fn test_set_completed(
        &mut self,
        _entry: &dyn ReportEntry,
        _statistics: &TestSetStatistics,
    ) -> Result<(), WriteReportError> {
        Ok(())
    }
}
