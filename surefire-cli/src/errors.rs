// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::output::StderrStyles;
use owo_colors::OwoColorize;
use std::{error::Error, path::PathBuf};
use surefire_metadata::SurefireExitCode;
use surefire_runner::errors::{ConfigParseError, ForkStartError, ProfileNotFound};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are mostly placeholders: errors are meant to be printed with
// display_to_stderr, which colorizes them and walks the source chain.

/// An error surefire expects and reports without a backtrace.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the workspace root")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("workspace root is not valid UTF-8")]
    WorkspaceRootInvalidUtf8 { path: PathBuf },
    #[error("could not locate the surefire executable")]
    CurrentExeFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("surefire executable path is not valid UTF-8")]
    CurrentExeInvalidUtf8 { path: PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("failed to start the test run")]
    ForkStartError {
        #[from]
        err: ForkStartError,
    },
    #[error("failed to write output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn current_dir_failed(err: std::io::Error) -> Self {
        Self::CurrentDirFailed { err }
    }

    pub(crate) fn current_exe_failed(err: std::io::Error) -> Self {
        Self::CurrentExeFailed { err }
    }

    pub(crate) fn write_output_error(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::WorkspaceRootInvalidUtf8 { .. }
            | Self::CurrentExeFailed { .. }
            | Self::CurrentExeInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. } => SurefireExitCode::SETUP_ERROR,
            Self::ForkStartError { err } => match err {
                ForkStartError::Spawn { .. }
                | ForkStartError::MissingPipe { .. }
                | ForkStartError::Wait { .. }
                | ForkStartError::Runtime(_) => SurefireExitCode::FORK_FAILED,
                ForkStartError::BooterConfig(_)
                | ForkStartError::Suites(_)
                | ForkStartError::CreateReporters { .. } => SurefireExitCode::SETUP_ERROR,
                ForkStartError::InProcess(_) => SurefireExitCode::BOOTER_ERROR,
            },
            Self::WriteOutputError { .. } => SurefireExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::WorkspaceRootInvalidUtf8 { path } => {
                error!(
                    "workspace root `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::CurrentExeFailed { err } => {
                error!("could not locate the surefire executable to start forks with");
                Some(err as &dyn Error)
            }
            Self::CurrentExeInvalidUtf8 { path } => {
                error!(
                    "surefire executable `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse surefire config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                None
            }
            Self::ForkStartError { err } => {
                error!("{err}");
                err.source()
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: "surefire_cli::no_heading", "\ncaused by:");
            error!(target: "surefire_cli::no_heading", "  - {}", err.style(styles.warning_text));
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surefire_runner::config::SurefireConfig;

    #[test]
    fn fork_start_errors_map_to_exit_codes() {
        let spawn = ExpectedError::from(ForkStartError::Spawn {
            program: "surefire".into(),
            err: std::io::Error::other("no such file"),
        });
        assert_eq!(spawn.process_exit_code(), SurefireExitCode::FORK_FAILED);

        let not_found = SurefireConfig::default_config("/ws")
            .profile("ci")
            .expect_err("only the default profile exists");
        let profile = ExpectedError::from(not_found);
        assert_eq!(profile.process_exit_code(), SurefireExitCode::SETUP_ERROR);

        let write = ExpectedError::write_output_error(std::io::Error::other("closed"));
        assert_eq!(write.process_exit_code(), SurefireExitCode::WRITE_OUTPUT_ERROR);
    }
}
