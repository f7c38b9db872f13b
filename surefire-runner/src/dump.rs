// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic dump files written when a fork hits an error it can't report over the channel.
//!
//! A fork writes to `<reports>/<stamp>-jvmRun<N>.dump` for its own errors and to
//! `<stamp>-jvmRun<N>.dumpstream` for problems with the channel itself. Files are created on
//! first write, so a healthy run leaves nothing behind.

use crate::errors::DisplayErrorChain;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use std::{
    error::Error,
    fs::{self, OpenOptions},
    io::Write,
    sync::{Arc, Mutex},
};
use tracing::debug;

/// Writes diagnostic dump files for one fork. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct DumpWriter {
    inner: Option<Arc<DumpInner>>,
}

#[derive(Debug)]
struct DumpInner {
    dump_path: Utf8PathBuf,
    dumpstream_path: Utf8PathBuf,
    lock: Mutex<()>,
}

impl DumpWriter {
    /// Returns a stamp identifying this run, used as the prefix of dump file names.
    pub fn new_stamp() -> String {
        Local::now().format("%Y-%m-%dT%H-%M-%S_%3f").to_string()
    }

    /// Creates a writer for fork `fork_number`.
    pub fn new(reports_dir: &Utf8Path, stamp: &str, fork_number: u32) -> Self {
        let base = format!("{stamp}-jvmRun{fork_number}");
        Self {
            inner: Some(Arc::new(DumpInner {
                dump_path: reports_dir.join(format!("{base}.dump")),
                dumpstream_path: reports_dir.join(format!("{base}.dumpstream")),
                lock: Mutex::new(()),
            })),
        }
    }

    /// Creates a writer that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// The path of the dump file, if enabled.
    pub fn dump_path(&self) -> Option<&Utf8Path> {
        self.inner.as_ref().map(|inner| inner.dump_path.as_path())
    }

    /// The path of the stream dump file, if enabled.
    pub fn dumpstream_path(&self) -> Option<&Utf8Path> {
        self.inner.as_ref().map(|inner| inner.dumpstream_path.as_path())
    }

    /// Records an error with its source chain.
    pub fn dump_exception(&self, message: Option<&str>, error: &dyn Error) {
        self.dump_text(&render(message, error));
    }

    /// Records free-form text.
    pub fn dump_text(&self, text: &str) {
        if let Some(inner) = &self.inner {
            inner.append(&inner.dump_path, text);
        }
    }

    /// Records a channel error with its source chain.
    pub fn dump_stream_exception(&self, message: Option<&str>, error: &dyn Error) {
        self.dump_stream_text(&render(message, error));
    }

    /// Records free-form text about the channel.
    pub fn dump_stream_text(&self, text: &str) {
        if let Some(inner) = &self.inner {
            inner.append(&inner.dumpstream_path, text);
        }
    }
}

fn render(message: Option<&str>, error: &dyn Error) -> String {
    let chain = DisplayErrorChain::new(error);
    match message {
        Some(message) => format!("{message}\n{chain}"),
        None => chain.to_string(),
    }
}

impl DumpInner {
    fn append(&self, path: &Utf8Path, text: &str) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = (|| {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(
                file,
                "# Created at {}\n{text}\n",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f")
            )
        })();
        if let Err(error) = result {
            // There's nowhere else to report this.
            debug!(%path, %error, "failed to write dump file");
        }
    }
}
