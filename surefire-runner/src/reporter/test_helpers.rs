// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{OutputStream, ReportEntry, RunListener, TestOutcome};
use std::{
    io,
    sync::{Arc, Mutex},
};

/// An in-memory writer whose contents can be inspected after being moved into a console.
#[derive(Clone, Debug, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("lock not poisoned")).into_owned()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock not poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A listener recording every call as a line of text.
#[derive(Debug, Default)]
pub(crate) struct RecordingListener {
    pub(crate) events: Vec<String>,
}

impl RunListener for RecordingListener {
    fn test_set_starting(&mut self, entry: &dyn ReportEntry) {
        self.events.push(format!("set-starting: {}", entry.source_name()));
    }

    fn test_set_completed(&mut self, entry: &dyn ReportEntry) {
        self.events
            .push(format!("set-completed: {}", entry.source_name()));
    }

    fn test_starting(&mut self, entry: &dyn ReportEntry) {
        self.events.push(format!("starting: {}", entry.test_id()));
    }

    fn test_finished(&mut self, outcome: TestOutcome, entry: &dyn ReportEntry) {
        self.events
            .push(format!("{outcome:?}: {}", entry.test_id()));
    }

    fn write_test_output(&mut self, stream: OutputStream, text: &str) {
        let stream = if stream.is_stdout() { "stdout" } else { "stderr" };
        self.events.push(format!("{stream}: {text}"));
    }

    fn test_execution_skipped_by_user(&mut self) {
        self.events.push("skipped-by-user".to_owned());
    }

    fn info(&mut self, message: &str) {
        self.events.push(format!("info: {message}"));
    }

    fn warning(&mut self, message: &str) {
        self.events.push(format!("warning: {message}"));
    }
}
