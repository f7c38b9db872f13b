// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Report entries: immutable descriptions of a single test or test set event.

use indexmap::IndexMap;
use std::fmt;

const GROUP_PREFIX: &str = " (of ";
const GROUP_SUFFIX: &str = ")";

/// A captured failure: the message plus full and trimmed traces.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackTraceWriter {
    test_class: Option<String>,
    message: Option<String>,
    full_trace: String,
    trimmed_trace: Option<String>,
}

impl StackTraceWriter {
    /// Creates a writer for a failure raised by `test_class`.
    ///
    /// `full_trace` is conventionally a header line (the failure description) followed by one
    /// line per frame.
    pub fn new(
        test_class: Option<impl Into<String>>,
        message: Option<impl Into<String>>,
        full_trace: impl Into<String>,
    ) -> Self {
        Self {
            test_class: test_class.map(Into::into),
            message: message.map(Into::into),
            full_trace: full_trace.into(),
            trimmed_trace: None,
        }
    }

    /// Rebuilds a writer whose traces were already rendered by another process.
    pub fn from_rendered(
        message: Option<String>,
        trimmed_trace: Option<String>,
        full_trace: Option<String>,
    ) -> Self {
        Self {
            test_class: None,
            message,
            full_trace: full_trace.unwrap_or_default(),
            trimmed_trace,
        }
    }

    /// The failure message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The complete trace.
    pub fn full_trace(&self) -> &str {
        &self.full_trace
    }

    /// The trace restricted to the test class's own frames.
    ///
    /// Keeps the header line and every line mentioning the test class. Falls back to the full
    /// trace if no frame mentions it.
    pub fn trimmed_trace(&self) -> String {
        if let Some(trimmed) = &self.trimmed_trace {
            return trimmed.clone();
        }
        let Some(test_class) = &self.test_class else {
            return self.full_trace.clone();
        };

        let mut lines = self.full_trace.lines();
        let Some(header) = lines.next() else {
            return String::new();
        };
        let frames: Vec<_> = lines.filter(|line| line.contains(test_class.as_str())).collect();
        if frames.is_empty() {
            return self.full_trace.clone();
        }
        let mut trimmed = header.to_owned();
        for frame in frames {
            trimmed.push('\n');
            trimmed.push_str(frame);
        }
        trimmed
    }
}

/// An immutable description of one test event.
///
/// Entries with and without a group behave the same way behind this trait.
pub trait ReportEntry: fmt::Debug + Send + Sync {
    /// The class or suite the event belongs to.
    fn source_name(&self) -> &str;

    /// A human-readable name for the source, if different from [`Self::source_name`].
    fn source_text(&self) -> Option<&str>;

    /// The test name, absent for test set events.
    fn name(&self) -> Option<&str>;

    /// A human-readable test name.
    fn name_text(&self) -> Option<&str>;

    /// The group or category of the test.
    fn group(&self) -> Option<&str>;

    /// The failure, if any.
    fn stack_trace_writer(&self) -> Option<&StackTraceWriter>;

    /// Elapsed time in milliseconds.
    fn elapsed(&self) -> Option<u64>;

    /// A message attached to the event.
    fn message(&self) -> Option<&str>;

    /// System properties snapshotted when the event was created.
    fn system_properties(&self) -> &IndexMap<String, String>;

    /// Elapsed time, or `fallback` if unknown.
    fn elapsed_or(&self, fallback: u64) -> u64 {
        self.elapsed().unwrap_or(fallback)
    }

    /// The name with its group appended, e.g. `second (of slow)`.
    fn name_with_group(&self) -> String {
        let name = self.name_text().or(self.name()).unwrap_or_default();
        match self.group() {
            Some(group) if !group.is_empty() => {
                format!("{name}{GROUP_PREFIX}{group}{GROUP_SUFFIX}")
            }
            _ => name.to_owned(),
        }
    }

    /// The identifier used in failure listings: `source.name`, or the source alone.
    fn test_id(&self) -> String {
        match self.name() {
            Some(name) if !name.is_empty() => format!("{}.{name}", self.source_name()),
            _ => self.source_name().to_owned(),
        }
    }
}

/// A report entry without a group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimpleReportEntry {
    source: String,
    source_text: Option<String>,
    name: Option<String>,
    name_text: Option<String>,
    stack_trace: Option<StackTraceWriter>,
    elapsed: Option<u64>,
    message: Option<String>,
    system_properties: IndexMap<String, String>,
}

impl SimpleReportEntry {
    /// Creates an entry for a test set.
    pub fn test_set(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Creates an entry for a single test.
    pub fn test(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Sets the display text of the source.
    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.source_text = Some(text.into());
        self
    }

    /// Sets the display text of the test.
    pub fn with_name_text(mut self, text: impl Into<String>) -> Self {
        self.name_text = Some(text.into());
        self
    }

    /// Attaches a failure.
    pub fn with_stack_trace(mut self, stack_trace: StackTraceWriter) -> Self {
        self.stack_trace = Some(stack_trace);
        self
    }

    /// Sets the elapsed time in milliseconds.
    pub fn with_elapsed(mut self, elapsed: u64) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// Sets the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the system properties snapshot.
    pub fn with_system_properties(mut self, properties: IndexMap<String, String>) -> Self {
        self.system_properties = properties;
        self
    }

    /// Sets optional fields in one go. Used when rebuilding entries from the wire.
    pub(crate) fn from_parts(
        source: String,
        source_text: Option<String>,
        name: Option<String>,
        name_text: Option<String>,
        message: Option<String>,
        elapsed: Option<u64>,
        stack_trace: Option<StackTraceWriter>,
    ) -> Self {
        Self {
            source,
            source_text,
            name,
            name_text,
            stack_trace,
            elapsed,
            message,
            system_properties: IndexMap::new(),
        }
    }

    /// Adds a group, turning this into a categorized entry.
    pub fn in_group(self, group: impl Into<String>) -> CategorizedReportEntry {
        CategorizedReportEntry {
            entry: self,
            group: group.into(),
        }
    }
}

impl ReportEntry for SimpleReportEntry {
    fn source_name(&self) -> &str {
        &self.source
    }

    fn source_text(&self) -> Option<&str> {
        self.source_text.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn name_text(&self) -> Option<&str> {
        self.name_text.as_deref()
    }

    fn group(&self) -> Option<&str> {
        None
    }

    fn stack_trace_writer(&self) -> Option<&StackTraceWriter> {
        self.stack_trace.as_ref()
    }

    fn elapsed(&self) -> Option<u64> {
        self.elapsed
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn system_properties(&self) -> &IndexMap<String, String> {
        &self.system_properties
    }
}

/// A report entry that belongs to a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategorizedReportEntry {
    entry: SimpleReportEntry,
    group: String,
}

impl ReportEntry for CategorizedReportEntry {
    fn source_name(&self) -> &str {
        self.entry.source_name()
    }

    fn source_text(&self) -> Option<&str> {
        self.entry.source_text()
    }

    fn name(&self) -> Option<&str> {
        self.entry.name()
    }

    fn name_text(&self) -> Option<&str> {
        self.entry.name_text()
    }

    fn group(&self) -> Option<&str> {
        Some(&self.group)
    }

    fn stack_trace_writer(&self) -> Option<&StackTraceWriter> {
        self.entry.stack_trace_writer()
    }

    fn elapsed(&self) -> Option<u64> {
        self.entry.elapsed()
    }

    fn message(&self) -> Option<&str> {
        self.entry.message()
    }

    fn system_properties(&self) -> &IndexMap<String, String> {
        self.entry.system_properties()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const TRACE: &str = indoc! {"
        assertion failed: expected 1, got 2
            at org.junit.Assert.fail(Assert.java:89)
            at org.x.ATest.second(ATest.java:12)
            at org.x.ATest.helper(ATest.java:40)
            at sun.reflect.NativeMethodAccessorImpl.invoke0(Native Method)"};

    #[test]
    fn trimmed_trace_keeps_test_class_frames() {
        let writer = StackTraceWriter::new(Some("org.x.ATest"), Some("expected 1"), TRACE);
        assert_eq!(
            writer.trimmed_trace(),
            indoc! {"
                assertion failed: expected 1, got 2
                    at org.x.ATest.second(ATest.java:12)
                    at org.x.ATest.helper(ATest.java:40)"}
        );
        assert_eq!(writer.full_trace(), TRACE);
    }

    #[test]
    fn trimmed_trace_falls_back_to_full() {
        let writer = StackTraceWriter::new(Some("org.y.Other"), None::<String>, TRACE);
        assert_eq!(writer.trimmed_trace(), TRACE);
    }

    #[test]
    fn group_is_appended() {
        let simple = SimpleReportEntry::test("org.x.ATest", "second");
        assert_eq!(simple.name_with_group(), "second");
        assert_eq!(simple.test_id(), "org.x.ATest.second");

        let categorized = simple.in_group("slow");
        assert_eq!(categorized.name_with_group(), "second (of slow)");
        assert_eq!(categorized.group(), Some("slow"));
    }

    #[test]
    fn test_set_id_is_the_source() {
        let entry = SimpleReportEntry::test_set("org.x.ATest").with_elapsed(12);
        assert_eq!(entry.test_id(), "org.x.ATest");
        assert_eq!(entry.elapsed_or(0), 12);
    }
}
