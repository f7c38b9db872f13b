// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-test output capture.
//!
//! Tests never write to the process-wide stdout and stderr. Providers hand each test a
//! [`TestOutputWriter`] that routes writes to the [`RunListener`] of the current execution
//! context, which buffers them into the [`CapturedOutput`] of the test that is running.

use super::RunListener;
use std::io;

/// The stream a piece of output was written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Returns true for [`OutputStream::Stdout`].
    pub fn is_stdout(self) -> bool {
        matches!(self, Self::Stdout)
    }
}

/// Output captured while a single test was running.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    stdout: String,
    stderr: String,
}

impl CapturedOutput {
    /// Creates an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends text to one of the streams.
    pub fn append(&mut self, stream: OutputStream, text: &str) {
        match stream {
            OutputStream::Stdout => self.stdout.push_str(text),
            OutputStream::Stderr => self.stderr.push_str(text),
        }
    }

    /// Captured standard output.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Captured standard error.
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// An [`io::Write`] handle a test writes its output through.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub struct TestOutputWriter<'a> {
    listener: &'a mut dyn RunListener,
    stream: OutputStream,
}

impl<'a> TestOutputWriter<'a> {
    /// Creates a writer for `stream` that forwards to `listener`.
    pub fn new(listener: &'a mut dyn RunListener, stream: OutputStream) -> Self {
        Self { listener, stream }
    }
}

impl io::Write for TestOutputWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() {
            self.listener
                .write_test_output(self.stream, &String::from_utf8_lossy(buf));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::test_helpers::RecordingListener;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn writer_forwards_to_listener() {
        let mut listener = RecordingListener::default();
        {
            let mut out = TestOutputWriter::new(&mut listener, OutputStream::Stdout);
            out.write_all(b"hello 42").expect("write succeeded");
        }
        {
            let mut err = TestOutputWriter::new(&mut listener, OutputStream::Stderr);
            err.write_all(b"bad \xff byte").expect("write succeeded");
        }
        assert_eq!(
            listener.events,
            vec![
                "stdout: hello 42".to_owned(),
                "stderr: bad \u{fffd} byte".to_owned()
            ]
        );
    }

    #[test]
    fn capture_keeps_streams_apart() {
        let mut capture = CapturedOutput::new();
        assert!(capture.is_empty());
        capture.append(OutputStream::Stdout, "a");
        capture.append(OutputStream::Stderr, "b");
        capture.append(OutputStream::Stdout, "c");
        assert_eq!(capture.stdout(), "ac");
        assert_eq!(capture.stderr(), "b");
    }
}
