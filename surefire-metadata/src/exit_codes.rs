// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

/// Documented exit codes for the surefire engine.
///
/// The first three codes are the contract between a forked process and the process that started
/// it: the parent (and any build tool wrapping it) only ever inspects these. The remaining codes
/// are produced by the `surefire` binary when a run could not be set up at all.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum SurefireExitCode {}

impl SurefireExitCode {
    /// All tests passed.
    pub const OK: i32 = 0;

    /// No tests were found, and the run was configured to fail in that case.
    pub const NO_TESTS: i32 = 254;

    /// One or more tests failed or errored.
    pub const FAILURE: i32 = 255;

    /// The booter could not start: the configuration couldn't be read, or a class loader or
    /// provider couldn't be created.
    pub const BOOTER_ERROR: i32 = 1;

    /// A forked process could not be started, or terminated without saying goodbye.
    pub const FORK_FAILED: i32 = 250;

    /// A user issue happened while setting up a surefire invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// Returns the exit code for a completed run.
    ///
    /// `fail_if_no_tests` turns an empty run into [`Self::NO_TESTS`]; otherwise an empty run is
    /// a success.
    pub fn for_run(
        completed: usize,
        errors: usize,
        failures: usize,
        fail_if_no_tests: bool,
    ) -> i32 {
        if completed == 0 && fail_if_no_tests {
            Self::NO_TESTS
        } else if errors > 0 || failures > 0 {
            Self::FAILURE
        } else {
            Self::OK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(3, 0, 0, false => SurefireExitCode::OK; "all passed")]
    #[test_case(0, 0, 0, false => SurefireExitCode::OK; "empty run allowed")]
    #[test_case(0, 0, 0, true => SurefireExitCode::NO_TESTS; "empty run rejected")]
    #[test_case(3, 1, 0, true => SurefireExitCode::FAILURE; "one error")]
    #[test_case(3, 0, 2, false => SurefireExitCode::FAILURE; "two failures")]
    fn exit_code_for_run(completed: usize, errors: usize, failures: usize, fail: bool) -> i32 {
        SurefireExitCode::for_run(completed, errors, failures, fail)
    }
}
