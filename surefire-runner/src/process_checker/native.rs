// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{ProcessChecker, ProcessInfo};
use crate::errors::ProcessCheckError;
use std::{
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::debug;

/// Checks the parent through the kernel's own process table, without spawning anything.
///
/// Available on Linux, where `/proc/<pid>/stat` exposes the process start time.
#[derive(Debug)]
pub struct NativeProcessChecker {
    ppid: String,
    pid: Option<i32>,
    info: Mutex<Option<ProcessInfo>>,
    stopped: AtomicBool,
}

impl NativeProcessChecker {
    /// Creates a checker for `ppid`.
    pub fn new(ppid: impl Into<String>) -> Self {
        let ppid = ppid.into();
        let pid = ppid.trim().parse().ok().filter(|pid| *pid > 0);
        Self {
            ppid,
            pid,
            info: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    fn inspect(&self, pid: i32) -> ProcessInfo {
        if !exists(pid) {
            return ProcessInfo::Invalid;
        }
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => parse_stat(&stat),
            Err(error) if error.kind() == io::ErrorKind::NotFound => ProcessInfo::Invalid,
            Err(error) => {
                debug!(pid, %error, "failed to read process status");
                ProcessInfo::Error
            }
        }
    }
}

impl ProcessChecker for NativeProcessChecker {
    fn ppid(&self) -> &str {
        &self.ppid
    }

    fn can_use(&self) -> bool {
        !self.is_stopped()
            && self.pid.is_some()
            && cfg!(target_os = "linux")
            && std::path::Path::new("/proc/self/stat").exists()
    }

    fn is_process_alive(&self) -> Result<bool, ProcessCheckError> {
        let Some(pid) = self.pid.filter(|_| self.can_use()) else {
            return Err(ProcessCheckError::NotUsable {
                ppid: self.ppid.clone(),
            });
        };

        let current = self.inspect(pid);
        let previous = self
            .info
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(current);

        if self.is_stopped() {
            return Err(ProcessCheckError::Stopped {
                ppid: self.ppid.clone(),
            });
        }
        if current.is_error() {
            return Err(ProcessCheckError::NoInformation {
                ppid: self.ppid.clone(),
            });
        }
        Ok(!current.is_invalid()
            && previous.is_none_or(|previous| current.is_same_process_as(&previous)))
    }

    fn destroy_active_commands(&self) {
        // Checks are synchronous reads; there is nothing to kill.
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn process_info(&self) -> Option<ProcessInfo> {
        *self.info.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(unix)]
fn exists(pid: i32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

    // EPERM means the process exists but belongs to someone else.
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

#[cfg(not(unix))]
fn exists(_pid: i32) -> bool {
    true
}

/// Extracts the start time from a `/proc/<pid>/stat` line.
///
/// The command name in field 2 may contain spaces and parentheses, so fields are counted from
/// the last closing parenthesis. Zombies are reported as gone.
fn parse_stat(stat: &str) -> ProcessInfo {
    let Some((_, rest)) = stat.rsplit_once(')') else {
        return ProcessInfo::Error;
    };
    let mut fields = rest.split_whitespace();
    // Field 3 is the state; field 22 is the start time.
    match fields.next() {
        Some("Z" | "X" | "x") => return ProcessInfo::Invalid,
        Some(_) => {}
        None => return ProcessInfo::Error,
    }
    match fields.nth(18).map(str::parse::<u64>) {
        Some(Ok(ticks)) => ProcessInfo::StartTicks { ticks },
        _ => ProcessInfo::Error,
    }
}
