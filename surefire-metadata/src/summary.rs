// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::SurefireExitCode;
use serde::{Deserialize, Serialize};

/// The machine-readable summary of a run, written as JSON next to the reports.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunSummary {
    /// The number of tests that ran to completion, whatever their outcome.
    pub completed: usize,

    /// The number of tests that errored.
    pub errors: usize,

    /// The number of tests that failed.
    pub failures: usize,

    /// The number of tests that were skipped.
    pub skipped: usize,

    /// The number of tests that failed at first and then passed on a rerun.
    #[serde(default)]
    pub flakes: usize,

    /// Whether a forked process hit its timeout.
    #[serde(default)]
    pub timeout: bool,

    /// The reason the run failed outside of individual tests, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    /// Identifiers of the tests that failed or errored, in the order they were reported.
    #[serde(default)]
    pub failed_tests: Vec<String>,

    /// Identifiers of the tests that passed on a rerun after failing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flaky_tests: Vec<String>,
}

impl RunSummary {
    /// The name of the summary file inside the reports directory.
    pub const FILE_NAME: &'static str = "surefire-summary.json";

    /// Returns the process exit code corresponding to this summary.
    pub fn exit_code(&self, fail_if_no_tests: bool) -> i32 {
        if self.failure.is_some() || self.timeout {
            return SurefireExitCode::FAILURE;
        }
        SurefireExitCode::for_run(
            self.completed,
            self.errors,
            self.failures,
            fail_if_no_tests,
        )
    }

    /// Serializes the summary as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a summary from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
