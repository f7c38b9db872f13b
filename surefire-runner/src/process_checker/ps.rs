// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{ProcessChecker, ProcessInfo};
use crate::errors::ProcessCheckError;
use camino::Utf8Path;
use chrono::{NaiveDateTime, TimeDelta};
use regex::Regex;
use std::sync::{
    Arc, LazyLock, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, warn};

static UNIX_ELAPSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(((\d+)-)?(\d{1,2}):)?(\d{1,2}):(\d{1,2})\s+(\d+)$").expect("regex is valid")
});

static BUSYBOX_ELAPSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)[hH](\d{1,2})\s+(\d+)$").expect("regex is valid"));

const ELAPSED_HEADER: &str = "ELAPSED";
const PID_HEADER: &str = "PID";
const CREATION_DATE_HEADER: &str = "CreationDate";
const CREATION_DATE_LEN: usize = 25;
const CREATION_TIMESTAMP_LEN: usize = 18;

/// Checks the parent with the platform's process listing tool: `ps` on Unix and PowerShell on
/// Windows.
#[derive(Debug)]
pub struct PsProcessChecker {
    ppid: String,
    info: Mutex<Option<ProcessInfo>>,
    stopped: AtomicBool,
    active: Mutex<Vec<Arc<duct::Handle>>>,
}

impl PsProcessChecker {
    /// Creates a checker for `ppid`.
    pub fn new(ppid: impl Into<String>) -> Self {
        Self {
            ppid: ppid.into(),
            info: Mutex::new(None),
            stopped: AtomicBool::new(false),
            active: Mutex::new(Vec::new()),
        }
    }

    fn last_info(&self) -> Option<ProcessInfo> {
        *self.info.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn inspect(&self) -> ProcessInfo {
        if cfg!(windows) {
            let script = format!(
                "$p = Get-CimInstance Win32_Process -Filter 'ProcessId={ppid}'; \
                 if ($p) {{ \
                     Write-Output '{CREATION_DATE_HEADER}'; \
                     [System.Management.ManagementDateTimeConverter]::ToDmtfDateTime($p.CreationDate) \
                 }}",
                ppid = self.ppid,
            );
            let expression = duct::cmd!(
                "powershell",
                "-NoProfile",
                "-NonInteractive",
                "-Command",
                script
            );
            self.execute(expression, parse_windows)
        } else {
            let ps = unix_ps_path().unwrap_or("/bin/ps");
            let select = if cfg!(target_os = "linux") { "" } else { "-p " };
            let command = format!("{ps} -o etime,pid {select}{}", self.ppid);
            let expression = duct::cmd!("/bin/sh", "-c", command);
            self.execute(expression, |output| parse_unix(&self.ppid, output))
        }
    }

    fn execute(
        &self,
        expression: duct::Expression,
        parse: impl FnOnce(&str) -> ProcessInfo,
    ) -> ProcessInfo {
        if self.is_stopped() {
            return ProcessInfo::Error;
        }

        let handle = match expression
            .stdout_capture()
            .stderr_null()
            .unchecked()
            .start()
        {
            Ok(handle) => Arc::new(handle),
            Err(error) => {
                debug!(ppid = %self.ppid, %error, "failed to start process check");
                return ProcessInfo::Error;
            }
        };
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle.clone());

        let result = handle.wait().map(|output| {
            if output.status.success() {
                parse(&String::from_utf8_lossy(&output.stdout))
            } else {
                ProcessInfo::Invalid
            }
        });

        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|active| !Arc::ptr_eq(active, &handle));

        match result {
            Ok(_) if self.is_stopped() => ProcessInfo::Error,
            Ok(info) => info,
            Err(error) => {
                debug!(ppid = %self.ppid, %error, "process check failed");
                ProcessInfo::Error
            }
        }
    }
}

impl ProcessChecker for PsProcessChecker {
    fn ppid(&self) -> &str {
        &self.ppid
    }

    fn can_use(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        match self.last_info() {
            Some(info) => info.can_use(),
            None => cfg!(windows) || (cfg!(unix) && unix_ps_path().is_some()),
        }
    }

    fn is_process_alive(&self) -> Result<bool, ProcessCheckError> {
        if !self.can_use() {
            return Err(ProcessCheckError::NotUsable {
                ppid: self.ppid.clone(),
            });
        }

        let previous = self.last_info();
        let current = self.inspect();
        *self.info.lock().unwrap_or_else(|e| e.into_inner()) = Some(current);

        if self.is_stopped() {
            return Err(ProcessCheckError::Stopped {
                ppid: self.ppid.clone(),
            });
        }
        if !current.can_use() {
            warn!(
                "cannot use PPID {} process information, going to use NOOP events",
                self.ppid
            );
            return Err(ProcessCheckError::NoInformation {
                ppid: self.ppid.clone(),
            });
        }

        Ok(!current.is_invalid()
            && previous.is_none_or(|previous| current.is_same_process_as(&previous)))
    }

    fn destroy_active_commands(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let active = std::mem::take(&mut *self.active.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in active {
            // The ps command may have exited on its own in the meantime.
            _ = handle.kill();
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn process_info(&self) -> Option<ProcessInfo> {
        self.last_info()
    }
}

fn unix_ps_path() -> Option<&'static str> {
    ["/usr/bin/ps", "/bin/ps"]
        .into_iter()
        .find(|path| is_executable(Utf8Path::new(path)))
}

#[cfg(unix)]
fn is_executable(path: &Utf8Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Utf8Path) -> bool {
    path.is_file()
}

/// Parses `ps -o etime,pid` output, looking for `ppid` below the header line.
pub(super) fn parse_unix(ppid: &str, output: &str) -> ProcessInfo {
    let mut has_header = false;
    for line in output.lines().map(str::trim) {
        if !has_header {
            has_header = line.contains(ELAPSED_HEADER) && line.contains(PID_HEADER);
            continue;
        }

        if let Some(captures) = UNIX_ELAPSED.captures(line)
            && &captures[7] == ppid
        {
            let group = |index: usize| {
                captures
                    .get(index)
                    .map_or(0, |m| m.as_str().parse::<u64>().unwrap_or(0))
            };
            let seconds = group(3) * 86_400 + group(4) * 3_600 + group(5) * 60 + group(6);
            return ProcessInfo::Elapsed { seconds };
        }

        if let Some(captures) = BUSYBOX_ELAPSED.captures(line)
            && &captures[3] == ppid
        {
            let group = |index: usize| captures[index].parse::<u64>().unwrap_or(0);
            return ProcessInfo::Elapsed {
                seconds: group(1) * 3_600 + group(2) * 60,
            };
        }
    }
    ProcessInfo::Invalid
}

/// Parses the WMIC-style `CreationDate` output, e.g. `20180406142327.741074+120`.
pub(super) fn parse_windows(output: &str) -> ProcessInfo {
    let mut has_header = false;
    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if !has_header {
            has_header = line == CREATION_DATE_HEADER;
            continue;
        }

        if line.len() != CREATION_DATE_LEN || !line.is_ascii() {
            debug!(line, "CreationDate should have {CREATION_DATE_LEN} characters");
            return ProcessInfo::Error;
        }
        let Ok(local) =
            NaiveDateTime::parse_from_str(&line[..CREATION_TIMESTAMP_LEN], "%Y%m%d%H%M%S%.3f")
        else {
            return ProcessInfo::Error;
        };
        let Ok(offset_minutes) = line[CREATION_DATE_LEN - 4..].parse::<i64>() else {
            return ProcessInfo::Error;
        };
        let at = local.and_utc() - TimeDelta::minutes(offset_minutes);
        return ProcessInfo::Created { at };
    }
    ProcessInfo::Invalid
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use indoc::indoc;
    use test_case::test_case;

    #[test_case("  ELAPSED   PID\n    10:01  4321\n", 601; "minutes and seconds")]
    #[test_case("ELAPSED PID\n03:10:01 4321\n", 3 * 3600 + 601; "hours")]
    #[test_case("ELAPSED PID\n2-03:10:01 4321\n", 2 * 86400 + 3 * 3600 + 601; "days")]
    #[test_case("ELAPSED PID\n5h02 4321\n", 5 * 3600 + 120; "busybox")]
    fn unix_elapsed(output: &str, seconds: u64) {
        assert_eq!(parse_unix("4321", output), ProcessInfo::Elapsed { seconds });
    }

    #[test_case("ELAPSED PID\n10:01 1234\n"; "other pid")]
    #[test_case("10:01 4321\n"; "no header")]
    #[test_case(""; "empty")]
    fn unix_invalid(output: &str) {
        assert_eq!(parse_unix("4321", output), ProcessInfo::Invalid);
    }

    #[test]
    fn windows_creation_date() {
        let output = indoc! {"

            CreationDate
            20180406142327.741074+120
        "};
        let expected = DateTime::parse_from_rfc3339("2018-04-06T12:23:27.741Z")
            .expect("valid date")
            .to_utc();
        assert_eq!(parse_windows(output), ProcessInfo::Created { at: expected });
    }

    #[test]
    fn windows_malformed() {
        assert_eq!(
            parse_windows("CreationDate\n2018040614\n"),
            ProcessInfo::Error
        );
        assert_eq!(parse_windows("nothing here\n"), ProcessInfo::Invalid);
    }

    #[test]
    fn not_usable_after_stop() {
        let checker = PsProcessChecker::new("1");
        checker.destroy_active_commands();
        assert!(checker.is_stopped());
        assert!(!checker.can_use());
        assert!(matches!(
            checker.is_process_alive(),
            Err(ProcessCheckError::NotUsable { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn checks_own_process() {
        let ppid = std::process::id().to_string();
        let checker = PsProcessChecker::new(&ppid);
        if !checker.can_use() {
            // No ps binary in this environment.
            return;
        }
        assert!(checker.is_process_alive().expect("check succeeds"));
        assert!(matches!(
            checker.process_info(),
            Some(ProcessInfo::Elapsed { .. })
        ));
    }
}
