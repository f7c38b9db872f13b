// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::FailureBudget;
use crate::{
    channel::{Event, EventCode},
    reporter::{
        OutputStream, ReportEntry, ReporterManager, RunListener, SimpleReportEntry,
        StackTraceWriter, TestOutcome,
    },
};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, error};

/// What the parent should do after an event from a fork.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientAction {
    /// Nothing.
    None,

    /// Send the next test class, or `TEST_SET_FINISHED` if there are none left.
    NextTest,

    /// Acknowledge the goodbye.
    Bye,

    /// The failure budget was just exhausted: skip the remaining tests everywhere.
    SkipRemaining,
}

/// The parent's view of one fork: decodes its events into a reporter manager.
pub struct ForkClient {
    fork_number: u32,
    manager: ReporterManager,
    budget: Option<Arc<FailureBudget>>,
    system_properties: IndexMap<String, String>,
    current_set: Option<String>,
    current_test: Option<SimpleReportEntry>,
    errors: Vec<StackTraceWriter>,
    said_goodbye: bool,
}

impl std::fmt::Debug for ForkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkClient")
            .field("fork_number", &self.fork_number)
            .field("current_set", &self.current_set)
            .field("said_goodbye", &self.said_goodbye)
            .finish_non_exhaustive()
    }
}

impl ForkClient {
    /// Creates a client for fork `fork_number` reporting into `manager`.
    pub fn new(
        fork_number: u32,
        manager: ReporterManager,
        budget: Option<Arc<FailureBudget>>,
    ) -> Self {
        Self {
            fork_number,
            manager,
            budget,
            system_properties: IndexMap::new(),
            current_set: None,
            current_test: None,
            errors: Vec::new(),
            said_goodbye: false,
        }
    }

    /// Returns true once the fork sent `BYE`.
    pub fn said_goodbye(&self) -> bool {
        self.said_goodbye
    }

    /// Fatal errors the fork reported.
    pub fn errors(&self) -> &[StackTraceWriter] {
        &self.errors
    }

    /// The test set the fork is running, if any.
    pub fn current_test_set(&self) -> Option<&str> {
        self.current_set.as_deref()
    }

    /// The system properties the fork reported.
    pub fn system_properties(&self) -> &IndexMap<String, String> {
        &self.system_properties
    }

    /// Handles one line the fork wrote to stdout.
    pub fn consume_line(&mut self, line: &str) -> ClientAction {
        match Event::parse_line(line) {
            Some((channel, event)) => {
                if channel != self.fork_number {
                    debug!(
                        fork_number = self.fork_number,
                        channel, "event on an unexpected channel"
                    );
                }
                self.consume_event(event)
            }
            None => {
                if !line.trim().is_empty() {
                    self.manager.warning(&format!(
                        "Corrupted channel by directly writing to native stream in forked \
                         process {}. Stream '{line}'.",
                        self.fork_number
                    ));
                }
                ClientAction::None
            }
        }
    }

    /// Handles one line the fork wrote to stderr.
    pub fn consume_stderr_line(&mut self, line: &str) {
        self.manager
            .warning(&format!("[fork {}] {line}", self.fork_number));
    }

    /// Handles one decoded event.
    pub fn consume_event(&mut self, event: Event) -> ClientAction {
        match event {
            Event::Entry { code, entry } => return self.consume_entry(code, entry.as_ref()),
            Event::StdOut(text) => self.manager.write_test_output(OutputStream::Stdout, &text),
            Event::StdErr(text) => self.manager.write_test_output(OutputStream::Stderr, &text),
            Event::Console(message) => self.manager.info(&message),
            Event::Warning(message) => self.manager.warning(&message),
            Event::Debug(message) => debug!(fork_number = self.fork_number, "{message}"),
            Event::Error(trace) => {
                error!(
                    fork_number = self.fork_number,
                    "forked process reported an error: {}",
                    trace.message().unwrap_or_else(|| trace.full_trace()),
                );
                self.errors.push(trace);
            }
            Event::SystemProperty { key, value } => {
                self.system_properties.insert(key, value);
            }
            Event::NextTest => return ClientAction::NextTest,
            Event::StopOnNextTest => self.manager.test_execution_skipped_by_user(),
            Event::Bye => {
                self.said_goodbye = true;
                return ClientAction::Bye;
            }
        }
        ClientAction::None
    }

    fn consume_entry(&mut self, code: EventCode, entry: &dyn ReportEntry) -> ClientAction {
        match code {
            EventCode::TestSetStarting => {
                self.current_set = Some(entry.source_name().to_owned());
                let entry = WithSystemProperties::new(entry, &self.system_properties);
                self.manager.test_set_starting(&entry);
            }
            EventCode::TestSetCompleted => {
                self.current_set = None;
                let entry = WithSystemProperties::new(entry, &self.system_properties);
                self.manager.test_set_completed(&entry);
            }
            EventCode::TestStarting => {
                self.current_test = Some(SimpleReportEntry::test(
                    entry.source_name(),
                    entry.name().unwrap_or_default(),
                ));
                self.manager.test_starting(entry);
            }
            code => {
                let Some(outcome) = outcome_of(code) else {
                    return ClientAction::None;
                };
                self.current_test = None;
                self.manager.test_finished(outcome, entry);
                if matches!(outcome, TestOutcome::Failed | TestOutcome::Error)
                    && let Some(budget) = &self.budget
                    && budget.record()
                {
                    return ClientAction::SkipRemaining;
                }
            }
        }
        ClientAction::None
    }

    /// Closes whatever the fork left open when it died, reporting the running test as an error.
    pub fn close_incomplete(&mut self, message: &str) {
        if let Some(test) = self.current_test.take() {
            self.manager.test_error(&test.with_message(message));
        }
        if let Some(set) = self.current_set.take() {
            let entry = SimpleReportEntry::test_set(set)
                .with_system_properties(self.system_properties.clone());
            self.manager.test_set_completed(&entry);
        }
    }
}

fn outcome_of(code: EventCode) -> Option<TestOutcome> {
    match code {
        EventCode::TestSucceeded => Some(TestOutcome::Succeeded),
        EventCode::TestFailed => Some(TestOutcome::Failed),
        EventCode::TestError => Some(TestOutcome::Error),
        EventCode::TestSkipped => Some(TestOutcome::Skipped),
        EventCode::TestAssumptionFailure => Some(TestOutcome::AssumptionFailure),
        _ => None,
    }
}

/// A test set entry decorated with the system properties of the fork it ran in.
#[derive(Debug)]
struct WithSystemProperties<'a> {
    entry: &'a dyn ReportEntry,
    system_properties: &'a IndexMap<String, String>,
}

impl<'a> WithSystemProperties<'a> {
    fn new(entry: &'a dyn ReportEntry, system_properties: &'a IndexMap<String, String>) -> Self {
        Self {
            entry,
            system_properties,
        }
    }
}

impl ReportEntry for WithSystemProperties<'_> {
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
        self.entry.group()
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
        if self.entry.system_properties().is_empty() {
            self.system_properties
        } else {
            self.entry.system_properties()
        }
    }
}
