// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Checks whether the parent process of a fork is still alive.
//!
//! A forked process must not outlive the process that started it. Checking that a PID exists is
//! not enough because the OS may hand the same PID to an unrelated process, so checkers also
//! compare an identity signal across checks:
//!
//! * The `ps`-based checker compares the elapsed running time, which only grows while the
//!   original process is alive.
//! * On Windows it compares the process creation timestamp, which must stay identical.
//! * The native checker compares the start time recorded by the kernel.
//!
//! Failing to determine liveness is never reported as "alive": checkers return an error and the
//! caller is expected to fall back to ping-based supervision.

mod native;
mod ps;

pub use native::NativeProcessChecker;
pub use ps::PsProcessChecker;

use crate::errors::ProcessCheckError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{fmt, str::FromStr};
use tracing::debug;

/// A snapshot of a monitored process's identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessInfo {
    /// Elapsed running time, as reported by `ps`.
    Elapsed {
        /// Elapsed seconds since the process started.
        seconds: u64,
    },

    /// Creation timestamp, as reported on Windows.
    Created {
        /// The creation time in UTC.
        at: DateTime<Utc>,
    },

    /// Start time in clock ticks since boot, as recorded by the kernel.
    StartTicks {
        /// The start time.
        ticks: u64,
    },

    /// The check ran but the process wasn't found.
    Invalid,

    /// The check itself failed.
    Error,
}

impl ProcessInfo {
    /// Returns true if the check ran but found nothing.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    /// Returns true if the check failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Returns true unless the check failed.
    pub fn can_use(&self) -> bool {
        !self.is_error()
    }

    /// Returns true if `self` describes the same, still-running process as `previous`.
    ///
    /// Elapsed time must not have decreased. Creation and start times must be identical.
    pub fn is_same_process_as(&self, previous: &ProcessInfo) -> bool {
        match (self, previous) {
            (Self::Elapsed { seconds }, Self::Elapsed { seconds: before }) => seconds >= before,
            (Self::Created { at }, Self::Created { at: before }) => at == before,
            (Self::StartTicks { ticks }, Self::StartTicks { ticks: before }) => ticks == before,
            _ => false,
        }
    }
}

/// Determines whether the parent process is alive.
pub trait ProcessChecker: fmt::Debug + Send + Sync {
    /// The monitored PID.
    fn ppid(&self) -> &str;

    /// Returns true if this checker can be used on this platform and hasn't been stopped.
    ///
    /// Must return true before [`Self::is_process_alive`] is called.
    fn can_use(&self) -> bool;

    /// Returns true if the parent is still running and is the same process as at the last check.
    fn is_process_alive(&self) -> Result<bool, ProcessCheckError>;

    /// Stops the checker and terminates any in-flight checks. Idempotent.
    fn destroy_active_commands(&self);

    /// Returns true once the checker has been stopped.
    fn is_stopped(&self) -> bool;

    /// Stops the checker. Idempotent.
    fn stop(&self) {
        self.destroy_active_commands();
    }

    /// The last check result.
    fn process_info(&self) -> Option<ProcessInfo>;
}

/// Which checker a forked process uses to watch its parent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessCheckerType {
    /// Only the native kernel-based check, falling back to pings.
    Native,

    /// Only ping-based supervision.
    Ping,

    /// The native check if usable, else `ps`, else pings.
    #[default]
    All,
}

impl ProcessCheckerType {
    /// Returns the name used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Ping => "ping",
            Self::All => "all",
        }
    }
}

impl fmt::Display for ProcessCheckerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessCheckerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "ping" => Ok(Self::Ping),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown process checker `{other}` (expected native, ping or all)"
            )),
        }
    }
}

/// Creates the checker for `ppid`, or `None` if supervision must rely on pings alone.
pub fn process_checker(
    ppid: &str,
    checker_type: ProcessCheckerType,
) -> Option<Box<dyn ProcessChecker>> {
    if checker_type == ProcessCheckerType::Ping {
        return None;
    }

    let native = NativeProcessChecker::new(ppid);
    if native.can_use() {
        debug!(ppid, "using native process checker");
        return Some(Box::new(native));
    }
    if checker_type == ProcessCheckerType::Native {
        debug!(ppid, "native process checker unavailable, falling back to pings");
        return None;
    }

    let ps = PsProcessChecker::new(ppid);
    if ps.can_use() {
        debug!(ppid, "using ps process checker");
        Some(Box::new(ps))
    } else {
        debug!(ppid, "no usable process checker, falling back to pings");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert_eq;
    use test_case::test_case;
    use test_strategy::proptest;

    #[proptest]
    fn elapsed_time_must_not_decrease(first: u32, second: u32) {
        let previous = ProcessInfo::Elapsed {
            seconds: first.into(),
        };
        let current = ProcessInfo::Elapsed {
            seconds: second.into(),
        };
        prop_assert_eq!(current.is_same_process_as(&previous), second >= first);
    }

    #[test]
    fn creation_time_must_match() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        let later = DateTime::from_timestamp(1_700_000_001, 0).expect("valid timestamp");
        let previous = ProcessInfo::Created { at };
        assert!(ProcessInfo::Created { at }.is_same_process_as(&previous));
        assert!(!ProcessInfo::Created { at: later }.is_same_process_as(&previous));
    }

    #[test]
    fn sentinels_never_match() {
        let elapsed = ProcessInfo::Elapsed { seconds: 5 };
        assert!(!ProcessInfo::Invalid.is_same_process_as(&elapsed));
        assert!(!ProcessInfo::Error.is_same_process_as(&elapsed));
        assert!(ProcessInfo::Invalid.can_use());
        assert!(!ProcessInfo::Error.can_use());
    }

    #[test_case("native", ProcessCheckerType::Native)]
    #[test_case("ping", ProcessCheckerType::Ping)]
    #[test_case("all", ProcessCheckerType::All)]
    fn checker_type_names(name: &str, expected: ProcessCheckerType) {
        assert_eq!(name.parse::<ProcessCheckerType>(), Ok(expected));
        assert_eq!(expected.to_string(), name);
    }

    #[test]
    fn ping_only_has_no_checker() {
        let ppid = std::process::id().to_string();
        assert!(process_checker(&ppid, ProcessCheckerType::Ping).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process_is_alive() {
        let ppid = std::process::id().to_string();
        let checker = process_checker(&ppid, ProcessCheckerType::All).expect("linux has a checker");
        assert!(checker.can_use());
        assert!(checker.is_process_alive().expect("check succeeds"));
        assert!(checker.is_process_alive().expect("check succeeds"));
        checker.stop();
        checker.stop();
        assert!(checker.is_stopped());
        assert!(!checker.can_use());
    }
}
