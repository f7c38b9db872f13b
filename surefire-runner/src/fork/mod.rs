// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Running tests in forked processes.
//!
//! The parent process decides which test classes run, starts forks through
//! [`ForkStarter`] and turns the events each fork sends back into reports with a
//! [`ForkClient`]. Classes are handed out lazily: a fork asks for the next class once it's done
//! with the previous one.

mod client;
mod starter;

pub use client::*;
pub use starter::*;

use crate::booter::{DEFAULT_EXIT_TIMEOUT, DEFAULT_PING_INTERVAL};
use camino::Utf8PathBuf;
use serde::Deserialize;
use std::{
    collections::VecDeque,
    fmt,
    str::FromStr,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// How tests are distributed over processes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForkMode {
    /// Run tests in the current process.
    Never,

    /// Start a fixed set of forks and stream every class to them.
    #[default]
    Once,

    /// Start a new fork for every test class.
    Always,
}

impl ForkMode {
    /// Derives the mode from a fork count and whether forks are reused.
    pub fn from_count(fork_count: usize, reuse_forks: bool) -> Self {
        match (fork_count, reuse_forks) {
            (0, _) => Self::Never,
            (_, true) => Self::Once,
            (_, false) => Self::Always,
        }
    }

    /// The name of this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Once => "once",
            Self::Always => "always",
        }
    }
}

impl fmt::Display for ForkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "once" => Ok(Self::Once),
            "always" => Ok(Self::Always),
            other => Err(format!(
                "unknown fork mode `{other}` (expected never, once or always)"
            )),
        }
    }
}

/// How forks are started and supervised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForkConfiguration {
    /// The fork mode.
    pub mode: ForkMode,

    /// The maximum number of forks running at the same time.
    pub fork_count: usize,

    /// The program started for every fork. It's passed `forked-booter <properties> <ppid>`.
    pub executable: Utf8PathBuf,

    /// How long a fork may run before it's shut down.
    pub timeout: Option<Duration>,

    /// How long a fork gets to exit after a shutdown request, and to drain its output after it
    /// exited.
    pub exit_timeout: Duration,

    /// How often the parent pings its forks.
    pub ping_interval: Duration,

    /// Keep booter properties files after the forks exit.
    pub keep_booter_files: bool,
}

impl ForkConfiguration {
    /// The subcommand the executable is started with.
    pub const BOOTER_SUBCOMMAND: &'static str = "forked-booter";

    /// Creates a configuration starting `executable` in `mode`.
    pub fn new(mode: ForkMode, executable: impl Into<Utf8PathBuf>) -> Self {
        Self {
            mode,
            fork_count: 1,
            executable: executable.into(),
            timeout: None,
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            keep_booter_files: false,
        }
    }
}

/// Counts failures and errors across all forks, and trips once a threshold is reached.
#[derive(Debug)]
pub struct FailureBudget {
    threshold: usize,
    seen: AtomicUsize,
}

impl FailureBudget {
    /// Creates a budget of `threshold` failures, or `None` if `threshold` is 0.
    pub fn new(threshold: usize) -> Option<Self> {
        (threshold > 0).then(|| Self {
            threshold,
            seen: AtomicUsize::new(0),
        })
    }

    /// Records one failure. Returns true for exactly the failure that exhausts the budget.
    pub fn record(&self) -> bool {
        self.seen.fetch_add(1, Ordering::AcqRel) + 1 == self.threshold
    }

    /// Returns true once the budget is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.seen.load(Ordering::Acquire) >= self.threshold
    }
}

/// The classes waiting to be handed out to forks.
#[derive(Debug, Default)]
pub struct TestQueue {
    classes: Mutex<VecDeque<String>>,
    closed: AtomicBool,
}

impl TestQueue {
    /// Creates a queue holding `classes` in order.
    pub fn new(classes: impl IntoIterator<Item = String>) -> Self {
        Self {
            classes: Mutex::new(classes.into_iter().collect()),
            closed: AtomicBool::new(false),
        }
    }

    /// Takes the next class, or `None` if the queue is empty or closed.
    pub fn next_class(&self) -> Option<String> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.classes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Stops handing out classes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// The number of classes left.
    pub fn len(&self) -> usize {
        self.classes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns true if no classes are left.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
