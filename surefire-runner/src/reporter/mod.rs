// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Report the results of a test run in human and machine-readable formats.
//!
//! Providers talk to a [`RunListener`]. In-process, and on the parent side of a fork, that
//! listener is a [`ReporterManager`] which keeps [`RunStatistics`] and fans every event out to
//! the configured [`Reporter`]s. Inside a fork it is a [`ForkingRunListener`] that turns events
//! into channel records.

mod capture;
mod console;
mod entry;
mod factory;
mod file;
mod forking;
mod listener;
mod manager;
mod statistics;
#[cfg(test)]
pub(crate) mod test_helpers;
mod xml;

pub use capture::*;
pub use console::{ConsoleOutputEcho, ConsoleReporter, ConsoleWriter};
pub use entry::*;
pub use factory::*;
pub use file::*;
pub use forking::*;
pub use listener::*;
pub use manager::ReporterManager;
pub use statistics::*;
pub use xml::*;
