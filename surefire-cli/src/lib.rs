// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! The `surefire` binary: runs test classes in forked processes and reports on them.
//!
//! `surefire run` is the parent process. Every fork it starts is the same binary, invoked with
//! the hidden `forked-booter` subcommand.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};
