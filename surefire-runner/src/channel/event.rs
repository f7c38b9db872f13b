// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Events sent by a forked process to its parent.
//!
//! Every event is one line: `<code>,<channel id in hex>,<payload>`. Report entries are sent as
//! nine fields: source, source text, name, name text, group, message, elapsed millis, trimmed
//! trace and full trace.

use super::escape::{escape, escape_opt, split_fields, unescape_field};
use crate::reporter::{ReportEntry, SimpleReportEntry, StackTraceWriter};
use std::{
    fmt,
    io::{self, Write},
    sync::Mutex,
};

/// The code identifying an event on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCode {
    /// A test set is starting.
    TestSetStarting,
    /// A test set completed.
    TestSetCompleted,
    /// Standard output of the current test.
    StdOut,
    /// Standard error of the current test.
    StdErr,
    /// A test is starting.
    TestStarting,
    /// A test succeeded.
    TestSucceeded,
    /// A test errored.
    TestError,
    /// A test failed.
    TestFailed,
    /// A test was skipped.
    TestSkipped,
    /// A test's assumption didn't hold.
    TestAssumptionFailure,
    /// An informational console message.
    Console,
    /// A system property of the forked process.
    SystemProperty,
    /// The fork asks for the next test class.
    NextTest,
    /// The fork acknowledges it will stop before the next test.
    StopOnNextTest,
    /// A fatal error inside the fork.
    Error,
    /// A debug message.
    Debug,
    /// A warning.
    Warning,
    /// The fork is about to exit.
    Bye,
}

impl EventCode {
    /// All codes.
    pub const ALL: &'static [Self] = &[
        Self::TestSetStarting,
        Self::TestSetCompleted,
        Self::StdOut,
        Self::StdErr,
        Self::TestStarting,
        Self::TestSucceeded,
        Self::TestError,
        Self::TestFailed,
        Self::TestSkipped,
        Self::TestAssumptionFailure,
        Self::Console,
        Self::SystemProperty,
        Self::NextTest,
        Self::StopOnNextTest,
        Self::Error,
        Self::Debug,
        Self::Warning,
        Self::Bye,
    ];

    /// The character written on the wire.
    pub fn as_char(self) -> char {
        match self {
            Self::TestSetStarting => '1',
            Self::TestSetCompleted => '2',
            Self::StdOut => '3',
            Self::StdErr => '4',
            Self::TestStarting => '5',
            Self::TestSucceeded => '6',
            Self::TestError => '7',
            Self::TestFailed => '8',
            Self::TestSkipped => '9',
            Self::TestAssumptionFailure => 'G',
            Self::Console => 'H',
            Self::SystemProperty => 'I',
            Self::NextTest => 'N',
            Self::StopOnNextTest => 'S',
            Self::Error => 'X',
            Self::Debug => 'D',
            Self::Warning => 'W',
            Self::Bye => 'Z',
        }
    }

    /// Looks a code up by its character.
    pub fn from_char(c: char) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_char() == c)
    }

    fn carries_entry(self) -> bool {
        matches!(
            self,
            Self::TestSetStarting
                | Self::TestSetCompleted
                | Self::TestStarting
                | Self::TestSucceeded
                | Self::TestError
                | Self::TestFailed
                | Self::TestSkipped
                | Self::TestAssumptionFailure
        )
    }
}

/// A decoded event.
#[derive(Debug)]
pub enum Event {
    /// An event about a test or a test set.
    Entry {
        /// Which lifecycle step this is.
        code: EventCode,
        /// The entry.
        entry: Box<dyn ReportEntry>,
    },
    /// Output written by the current test to stdout.
    StdOut(String),
    /// Output written by the current test to stderr.
    StdErr(String),
    /// An informational console message.
    Console(String),
    /// A warning.
    Warning(String),
    /// A debug message.
    Debug(String),
    /// A fatal error inside the fork.
    Error(StackTraceWriter),
    /// A system property of the forked process.
    SystemProperty {
        /// The key.
        key: String,
        /// The value.
        value: String,
    },
    /// The fork asks for the next test class.
    NextTest,
    /// The fork acknowledges it will stop before the next test.
    StopOnNextTest,
    /// The fork is about to exit.
    Bye,
}

impl Event {
    /// The wire code of this event.
    pub fn code(&self) -> EventCode {
        match self {
            Self::Entry { code, .. } => *code,
            Self::StdOut(_) => EventCode::StdOut,
            Self::StdErr(_) => EventCode::StdErr,
            Self::Console(_) => EventCode::Console,
            Self::Warning(_) => EventCode::Warning,
            Self::Debug(_) => EventCode::Debug,
            Self::Error(_) => EventCode::Error,
            Self::SystemProperty { .. } => EventCode::SystemProperty,
            Self::NextTest => EventCode::NextTest,
            Self::StopOnNextTest => EventCode::StopOnNextTest,
            Self::Bye => EventCode::Bye,
        }
    }

    /// Parses one line, returning the channel id and the event.
    ///
    /// Returns `None` if the line isn't an event, e.g. because something else wrote to the
    /// channel.
    pub fn parse_line(line: &str) -> Option<(u32, Event)> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut parts = line.splitn(3, ',');
        let mut code_chars = parts.next()?.chars();
        let code = EventCode::from_char(code_chars.next()?)?;
        if code_chars.next().is_some() {
            return None;
        }
        let channel = u32::from_str_radix(parts.next()?, 16).ok()?;
        let payload = parts.next().unwrap_or_default();

        let text = || unescape_field(payload).unwrap_or_default();
        let event = match code {
            code if code.carries_entry() => Event::Entry {
                code,
                entry: parse_entry(payload)?,
            },
            EventCode::StdOut => Event::StdOut(text()),
            EventCode::StdErr => Event::StdErr(text()),
            EventCode::Console => Event::Console(text()),
            EventCode::Warning => Event::Warning(text()),
            EventCode::Debug => Event::Debug(text()),
            EventCode::Error => {
                let mut fields = split_fields(payload).into_iter();
                let mut next = || fields.next().flatten();
                Event::Error(StackTraceWriter::from_rendered(next(), next(), next()))
            }
            EventCode::SystemProperty => {
                let mut fields = split_fields(payload).into_iter();
                let key = fields.next().flatten()?;
                let value = fields.next().flatten().unwrap_or_default();
                Event::SystemProperty { key, value }
            }
            EventCode::NextTest => Event::NextTest,
            EventCode::StopOnNextTest => Event::StopOnNextTest,
            EventCode::Bye => Event::Bye,
            _ => return None,
        };
        Some((channel, event))
    }
}

fn parse_entry(payload: &str) -> Option<Box<dyn ReportEntry>> {
    let fields = split_fields(payload);
    if fields.len() != 9 {
        return None;
    }
    let mut fields = fields.into_iter();
    let mut next = || fields.next().flatten();
    let source = next()?;
    let source_text = next();
    let name = next();
    let name_text = next();
    let group = next();
    let message = next();
    let elapsed = match next() {
        Some(elapsed) => Some(elapsed.parse::<u64>().ok()?),
        None => None,
    };
    let trimmed = next();
    let full = next();
    let stack_trace = (trimmed.is_some() || full.is_some())
        .then(|| StackTraceWriter::from_rendered(message.clone(), trimmed, full));

    let entry = SimpleReportEntry::from_parts(
        source,
        source_text,
        name,
        name_text,
        message,
        elapsed,
        stack_trace,
    );
    Some(match group {
        Some(group) => Box::new(entry.in_group(group)) as Box<dyn ReportEntry>,
        None => Box::new(entry),
    })
}

fn entry_payload(entry: &dyn ReportEntry) -> String {
    let trace = entry.stack_trace_writer();
    let message = entry.message().or_else(|| trace.and_then(|t| t.message()));
    let elapsed = entry.elapsed().map(|elapsed| elapsed.to_string());
    let trimmed = trace.map(|t| t.trimmed_trace());
    [
        escape(entry.source_name()),
        escape_opt(entry.source_text()),
        escape_opt(entry.name()),
        escape_opt(entry.name_text()),
        escape_opt(entry.group()),
        escape_opt(message),
        escape_opt(elapsed.as_deref()),
        escape_opt(trimmed.as_deref()),
        escape_opt(trace.map(|t| t.full_trace())),
    ]
    .join(",")
}

/// Writes events to a stream. Safe to share between threads; each event is written and flushed
/// as a unit.
pub struct EventEncoder<W> {
    channel: u32,
    writer: Mutex<W>,
}

impl<W> fmt::Debug for EventEncoder<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEncoder")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl<W: Write> EventEncoder<W> {
    /// Creates an encoder writing to `writer` on `channel`.
    pub fn new(writer: W, channel: u32) -> Self {
        Self {
            channel,
            writer: Mutex::new(writer),
        }
    }

    fn write(&self, code: EventCode, payload: &str) -> io::Result<()> {
        let line = format!("{},{:x},{payload}\n", code.as_char(), self.channel);
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }

    /// Writes a test or test set event.
    ///
    /// # Panics
    ///
    /// Panics if `code` is not an entry event.
    pub fn entry(&self, code: EventCode, entry: &dyn ReportEntry) -> io::Result<()> {
        assert!(code.carries_entry(), "{code:?} does not carry a report entry");
        self.write(code, &entry_payload(entry))
    }

    /// Writes captured output.
    pub fn output(&self, stdout: bool, text: &str) -> io::Result<()> {
        let code = if stdout {
            EventCode::StdOut
        } else {
            EventCode::StdErr
        };
        self.write(code, &escape(text))
    }

    /// Writes an informational message.
    pub fn console(&self, message: &str) -> io::Result<()> {
        self.write(EventCode::Console, &escape(message))
    }

    /// Writes a warning.
    pub fn warning(&self, message: &str) -> io::Result<()> {
        self.write(EventCode::Warning, &escape(message))
    }

    /// Writes a debug message.
    pub fn debug(&self, message: &str) -> io::Result<()> {
        self.write(EventCode::Debug, &escape(message))
    }

    /// Writes a fatal error.
    pub fn error(&self, error: &StackTraceWriter) -> io::Result<()> {
        let payload = [
            escape_opt(error.message()),
            escape(&error.trimmed_trace()),
            escape(error.full_trace()),
        ]
        .join(",");
        self.write(EventCode::Error, &payload)
    }

    /// Writes a system property.
    pub fn system_property(&self, key: &str, value: &str) -> io::Result<()> {
        self.write(
            EventCode::SystemProperty,
            &format!("{},{}", escape(key), escape(value)),
        )
    }

    /// Asks the parent for the next test class.
    pub fn next_test(&self) -> io::Result<()> {
        self.write(EventCode::NextTest, "")
    }

    /// Acknowledges a skip request.
    pub fn stop_on_next_test(&self) -> io::Result<()> {
        self.write(EventCode::StopOnNextTest, "")
    }

    /// Says goodbye.
    pub fn bye(&self) -> io::Result<()> {
        self.write(EventCode::Bye, "")
    }

    /// Consumes the encoder, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all(bytes: &[u8]) -> Vec<Event> {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(|line| {
                let (channel, event) = Event::parse_line(line).expect("valid event");
                assert_eq!(channel, 0x1f);
                event
            })
            .collect()
    }

    #[test]
    fn entries_round_trip() {
        let encoder = EventEncoder::new(Vec::new(), 0x1f);
        let trace = StackTraceWriter::new(
            Some("org.x.ATest"),
            Some("boom, again"),
            "failure: boom, again\n  at org.x.ATest.second\n  at lib.Other",
        );
        let failed = SimpleReportEntry::test("org.x.ATest", "second")
            .with_name_text("second()")
            .with_elapsed(15)
            .with_stack_trace(trace)
            .in_group("slow");
        encoder
            .entry(EventCode::TestFailed, &failed)
            .expect("write succeeds");
        encoder
            .entry(
                EventCode::TestSetStarting,
                &SimpleReportEntry::test_set("org.x.ATest"),
            )
            .expect("write succeeds");

        let events = decode_all(&encoder.into_inner());
        assert_eq!(events.len(), 2);

        let Event::Entry { code, entry } = &events[0] else {
            panic!("expected an entry, got {:?}", events[0]);
        };
        assert_eq!(*code, EventCode::TestFailed);
        assert_eq!(entry.source_name(), "org.x.ATest");
        assert_eq!(entry.name(), Some("second"));
        assert_eq!(entry.name_text(), Some("second()"));
        assert_eq!(entry.group(), Some("slow"));
        assert_eq!(entry.elapsed(), Some(15));
        assert_eq!(entry.message(), Some("boom, again"));
        let trace = entry.stack_trace_writer().expect("has trace");
        assert_eq!(
            trace.trimmed_trace(),
            "failure: boom, again\n  at org.x.ATest.second"
        );
        assert_eq!(
            trace.full_trace(),
            "failure: boom, again\n  at org.x.ATest.second\n  at lib.Other"
        );

        let Event::Entry { code, entry } = &events[1] else {
            panic!("expected an entry, got {:?}", events[1]);
        };
        assert_eq!(*code, EventCode::TestSetStarting);
        assert_eq!(entry.name(), None);
        assert_eq!(entry.group(), None);
        assert!(entry.stack_trace_writer().is_none());
    }

    #[test]
    fn control_events() {
        let encoder = EventEncoder::new(Vec::new(), 0x1f);
        encoder.output(true, "line\nwith, comma").expect("write");
        encoder.output(false, "err").expect("write");
        encoder.system_property("user.dir", "/tmp").expect("write");
        encoder.next_test().expect("write");
        encoder.stop_on_next_test().expect("write");
        encoder.warning("careful").expect("write");
        encoder.bye().expect("write");

        let bytes = encoder.into_inner();
        let text = String::from_utf8(bytes.clone()).expect("utf-8");
        assert!(text.ends_with("N,1f,\nS,1f,\nW,1f,careful\nZ,1f,\n"), "text: {text}");

        let codes: Vec<_> = decode_all(&bytes).iter().map(Event::code).collect();
        assert_eq!(
            codes,
            vec![
                EventCode::StdOut,
                EventCode::StdErr,
                EventCode::SystemProperty,
                EventCode::NextTest,
                EventCode::StopOnNextTest,
                EventCode::Warning,
                EventCode::Bye,
            ]
        );
        assert!(matches!(
            &decode_all(&bytes)[0],
            Event::StdOut(text) if text == "line\nwith, comma"
        ));
    }

    #[test]
    fn foreign_lines_are_not_events() {
        assert!(Event::parse_line("Listening for transport dt_socket").is_none());
        assert!(Event::parse_line("Z").is_none());
        assert!(Event::parse_line("ZZ,0,").is_none());
        assert!(Event::parse_line("6,0,only,three,fields").is_none());
    }
}
