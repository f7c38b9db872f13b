// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! The line-based channel between a parent and its forked processes.
//!
//! Commands flow from the parent to the fork over the fork's stdin; events flow back over its
//! stdout. Both directions use newline-terminated records of the form `<code>,<id>,<payload>`.

mod command;
mod escape;
mod event;

pub use command::*;
pub use event::*;
