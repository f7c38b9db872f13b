// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Machine-readable metadata for the surefire test engine.
//!
//! This crate contains the parts of the engine's surface that other tools depend on: the
//! documented process exit codes, the JSON summary written at the end of every run and the
//! run history that orders later runs.

mod exit_codes;
mod run_history;
mod summary;

pub use exit_codes::*;
pub use run_history::*;
pub use summary::*;
