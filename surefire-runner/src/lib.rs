// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Core functionality for surefire: forking test processes, talking to them and reporting on the
//! tests they run.
//!
//! The basic flow is: the parent reads a [`config::SurefireProfile`], builds a
//! [`booter::BooterConfiguration`] and hands it to a [`fork::ForkStarter`]. Every fork boots from a
//! properties file with [`booter::ForkedBooter`], reads commands through a
//! [`command_reader::CommandReader`] and sends [`channel::Event`]s back, which the parent feeds to
//! its [reporters](reporter).

pub mod booter;
pub mod channel;
pub mod classpath;
pub mod command_reader;
pub mod config;
pub mod dump;
pub mod errors;
pub mod fork;
mod helpers;
pub mod process_checker;
pub mod provider;
pub mod reporter;
mod time;
