// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Errors produced by the surefire engine.

use crate::{booter::TypeTag, channel::MasterProcessCommand};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error::Error, fmt, io};
use thiserror::Error;

/// An error that occurred while parsing the user configuration.
#[derive(Debug, Error)]
#[error("failed to parse surefire config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error which indicates that a profile was requested but not known.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurred while parsing a Java-style properties document.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct PropertiesParseError {
    line: usize,
    message: String,
}

impl PropertiesParseError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// An error that occurred while reading or writing a booter configuration.
///
/// Every variant is fatal for the fork: a child that cannot rebuild its configuration cannot run
/// any tests.
#[derive(Debug, Error)]
pub enum BooterConfigError {
    /// Reading the properties file failed.
    #[error("failed to read booter properties from `{path}`")]
    Read {
        /// The file that was being read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// Writing the properties file failed.
    #[error("failed to write booter properties")]
    Write {
        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The properties document was malformed.
    #[error("malformed booter properties")]
    Parse(#[from] PropertiesParseError),

    /// A serialized parameter carried a type tag that this version doesn't know about.
    #[error("unknown parameter type `{tag}` for key `{key}`")]
    UnknownParamType {
        /// The property key holding the parameter list.
        key: String,

        /// The unrecognized type tag.
        tag: String,
    },

    /// A parameter value didn't match its declared type.
    #[error("invalid value for key `{key}` (expected {expected})")]
    InvalidParam {
        /// The property key holding the parameter list.
        key: String,

        /// The type the value was declared as.
        expected: TypeTag,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// The `.types` and `.params` lists for a key have different lengths.
    #[error("key `{key}` declares {types} types but has {params} parameters")]
    ParamCountMismatch {
        /// The property key holding the parameter list.
        key: String,

        /// The number of declared types.
        types: usize,

        /// The number of parameters.
        params: usize,
    },

    /// A required key was missing.
    #[error("required key `{key}` is missing")]
    MissingKey {
        /// The missing key.
        key: String,
    },

    /// A key held a value that could not be interpreted.
    #[error("invalid value `{value}` for key `{key}`: {reason}")]
    InvalidValue {
        /// The key.
        key: String,

        /// The raw value.
        value: String,

        /// Why the value was rejected.
        reason: String,
    },
}

/// An error produced while decoding a command or event record from a stream.
#[derive(Debug, Error)]
pub enum ChannelDecodeError {
    /// The stream ended.
    #[error("end of stream")]
    EndOfStream,

    /// The channel was closed while a record was being read.
    #[error("channel closed while reading a record")]
    Closed,

    /// Reading from the stream failed.
    #[error("error reading from channel")]
    Io(#[source] io::Error),
}

impl ChannelDecodeError {
    /// Returns true if the error means the stream is simply over, as opposed to corrupted.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream | Self::Closed)
    }

    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::EndOfStream,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset => Self::Closed,
            _ => Self::Io(err),
        }
    }
}

/// An error produced by a [`ProcessChecker`](crate::process_checker::ProcessChecker).
#[derive(Debug, Error)]
pub enum ProcessCheckError {
    /// `is_process_alive` was called although `can_use` returned false.
    #[error("process checker for PID {ppid} is not usable")]
    NotUsable {
        /// The monitored PID.
        ppid: String,
    },

    /// The checker was stopped while a check was in flight.
    #[error("process checker for PID {ppid} was stopped")]
    Stopped {
        /// The monitored PID.
        ppid: String,
    },

    /// The check ran but didn't produce usable information.
    #[error("cannot use process information for PID {ppid}")]
    NoInformation {
        /// The monitored PID.
        ppid: String,
    },

    /// This platform has no supported way to check the process.
    #[error("unsupported platform for checking PID {ppid}")]
    UnsupportedPlatform {
        /// The monitored PID.
        ppid: String,
    },
}

/// An error produced while resolving a class through a class loader.
#[derive(Debug, Error)]
pub enum ClassLoadError {
    /// No loader in the hierarchy could find the class.
    #[error("class `{class_name}` not found by the {role} loader")]
    NotFound {
        /// The requested class.
        class_name: String,

        /// The role of the loader the lookup started at.
        role: String,
    },

    /// The class name isn't a valid dotted name.
    #[error("invalid class name `{class_name}`")]
    InvalidName {
        /// The requested class.
        class_name: String,
    },
}

/// An error produced while creating or running a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No provider is registered under this name.
    #[error("unknown provider `{name}` (known providers: {})", .known.join(", "))]
    UnknownProvider {
        /// The requested provider.
        name: String,

        /// Registered provider names.
        known: Vec<String>,
    },

    /// A reporter definition named an unregistered reporter.
    #[error("unknown reporter `{name}` (known reporters: {})", .known.join(", "))]
    UnknownReporter {
        /// The requested reporter.
        name: String,

        /// Registered reporter names.
        known: Vec<String>,
    },

    /// A reporter was given parameters it cannot accept.
    #[error("invalid parameters for reporter `{name}`: {reason}")]
    InvalidReporterParams {
        /// The reporter name.
        name: String,

        /// What was wrong.
        reason: String,
    },

    /// Scanning the test classes directory failed.
    #[error("failed to scan `{dir}` for tests")]
    Scan {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// An include or exclude pattern was invalid.
    #[error("invalid test pattern `{pattern}`")]
    InvalidPattern {
        /// The pattern.
        pattern: String,

        /// The underlying error.
        #[source]
        err: globset::Error,
    },

    /// A class loader failed.
    #[error(transparent)]
    ClassLoad(#[from] ClassLoadError),

    /// The test set failed as a whole.
    #[error("test set `{test_set}` failed: {message}")]
    TestSetFailed {
        /// The test set.
        test_set: String,

        /// What happened.
        message: String,
    },
}

/// An error produced while starting or supervising a forked process.
#[derive(Debug, Error)]
pub enum ForkStartError {
    /// The booter configuration couldn't be written.
    #[error("failed to write booter configuration")]
    BooterConfig(#[from] BooterConfigError),

    /// The child process couldn't be spawned.
    #[error("failed to spawn forked process `{program}`")]
    Spawn {
        /// The program.
        program: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The child's standard streams weren't available.
    #[error("forked process {fork_number} has no {stream} pipe")]
    MissingPipe {
        /// The fork number.
        fork_number: u32,

        /// The stream name.
        stream: &'static str,
    },

    /// Waiting for the child failed.
    #[error("failed to wait for forked process {fork_number}")]
    Wait {
        /// The fork number.
        fork_number: u32,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The test classes to run couldn't be determined.
    #[error("failed to determine the test classes to run")]
    Suites(#[source] ProviderError),

    /// The reporters of a fork couldn't be created.
    #[error("failed to create reporters for fork {fork_number}")]
    CreateReporters {
        /// The fork number, 0 for the in-process run.
        fork_number: u32,

        /// The underlying error.
        #[source]
        err: ProviderError,
    },

    /// Running tests in process failed.
    #[error("failed to run tests in process")]
    InProcess(#[from] ProviderError),

    /// Setting up the async runtime failed.
    #[error("failed to create the fork runtime")]
    Runtime(#[source] io::Error),
}

/// An error produced by the forked booter before or while running tests.
#[derive(Debug, Error)]
pub enum ForkedBooterError {
    /// The configuration couldn't be read.
    #[error(transparent)]
    Config(#[from] BooterConfigError),

    /// The provider couldn't be created or failed as a whole.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Writing to the event channel failed.
    #[error("failed to write to the event channel")]
    EventChannel(#[source] io::Error),
}

/// An error produced while writing a report file.
#[derive(Debug, Error)]
pub enum WriteReportError {
    /// Creating the reports directory failed.
    #[error("failed to create reports directory `{dir}`")]
    CreateDir {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// Writing a report file failed.
    #[error("failed to write report `{path}`")]
    Io {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// Serializing the JUnit XML failed.
    #[error("failed to serialize JUnit report `{path}`")]
    Junit {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: quick_junit::SerializeError,
    },

    /// Writing to the console failed.
    #[error("failed to write to the console")]
    Console(#[source] io::Error),
}

/// A command could not be encoded because it carries an unexpected payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("command {command} {}", if *.expects_data { "requires a payload" } else { "takes no payload" })]
pub struct CommandEncodeError {
    pub(crate) command: MasterProcessCommand,
    pub(crate) expects_data: bool,
}

/// Displays an error along with its chain of sources.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        while let Some(err) = source {
            write!(f, "\n  caused by:\n  - {err}")?;
            source = err.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_lists_sources() {
        let err = BooterConfigError::Write {
            err: io::Error::other("disk full"),
        };
        let displayed = DisplayErrorChain::new(&err).to_string();
        assert_eq!(
            displayed,
            "failed to write booter properties\n  caused by:\n  - disk full"
        );
    }

    #[test]
    fn end_of_stream_classification() {
        let eof = ChannelDecodeError::from_io(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(eof.is_end_of_stream());
        let closed = ChannelDecodeError::from_io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(closed.is_end_of_stream());
        let other = ChannelDecodeError::from_io(io::Error::other("bad"));
        assert!(!other.is_end_of_stream());
    }
}
