// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ProviderError;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, Timelike};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::Deserialize;
use std::{cmp::Reverse, fmt, fs, io, str::FromStr};
use surefire_metadata::RunHistory;
use tracing::{debug, warn};

/// The order test classes are handed out in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOrder {
    /// The order the filesystem lists entries in.
    #[default]
    Filesystem,
    /// Sorted by class name.
    Alphabetical,
    /// Sorted by class name, descending.
    ReverseAlphabetical,
    /// Shuffled with a seed.
    Random,
    /// Classes that failed or errored recently first.
    FailedFirst,
    /// The slowest classes first, so that forks finish at about the same time.
    Balanced,
    /// Alphabetical during even hours, reverse alphabetical during odd ones.
    Hourly,
}

impl RunOrder {
    /// The name of this run order.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Alphabetical => "alphabetical",
            Self::ReverseAlphabetical => "reversealphabetical",
            Self::Random => "random",
            Self::FailedFirst => "failedfirst",
            Self::Balanced => "balanced",
            Self::Hourly => "hourly",
        }
    }

    /// Returns true if this order depends on earlier runs.
    pub fn uses_history(self) -> bool {
        matches!(self, Self::FailedFirst | Self::Balanced)
    }
}

impl fmt::Display for RunOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" => Ok(Self::Filesystem),
            "alphabetical" => Ok(Self::Alphabetical),
            "reversealphabetical" => Ok(Self::ReverseAlphabetical),
            "random" => Ok(Self::Random),
            "failedfirst" => Ok(Self::FailedFirst),
            "balanced" => Ok(Self::Balanced),
            "hourly" => Ok(Self::Hourly),
            other => Err(format!(
                "unknown run order `{other}` (expected filesystem, alphabetical, \
                 reversealphabetical, random, failedfirst, balanced or hourly)"
            )),
        }
    }
}

/// Where test classes are found, which of them run and in which order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryScannerParameters {
    /// The directory scanned for test classes.
    pub test_classes_dir: Utf8PathBuf,

    /// Glob patterns a relative path must match.
    pub includes: Vec<String>,

    /// Glob patterns excluding relative paths.
    pub excludes: Vec<String>,

    /// If not empty, only classes whose name or simple name matches one of these globs run.
    pub specific_tests: Vec<String>,

    /// The order classes run in.
    pub run_order: RunOrder,

    /// The seed for [`RunOrder::Random`]. Chosen at scan time if absent.
    pub run_order_seed: Option<u64>,
}

impl Default for DirectoryScannerParameters {
    fn default() -> Self {
        Self {
            test_classes_dir: Utf8PathBuf::from("target/test-classes"),
            includes: default_includes(),
            excludes: Vec::new(),
            specific_tests: Vec::new(),
            run_order: RunOrder::default(),
            run_order_seed: None,
        }
    }
}

/// The include patterns used when none are configured.
pub fn default_includes() -> Vec<String> {
    ["**/Test*", "**/*Test", "**/*Tests", "**/*TestCase"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Reads the run history kept in `reports_dir`. A missing or unreadable history is empty.
pub fn load_run_history(reports_dir: &Utf8Path) -> RunHistory {
    let path = reports_dir.join(RunHistory::FILE_NAME);
    let json = match fs::read_to_string(&path) {
        Ok(json) => json,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return RunHistory::default(),
        Err(error) => {
            warn!(%path, %error, "failed to read run history");
            return RunHistory::default();
        }
    };
    RunHistory::from_json(&json).unwrap_or_else(|error| {
        warn!(%path, %error, "ignoring invalid run history");
        RunHistory::default()
    })
}

/// The classes found by a scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanResult {
    /// Dotted class names, in run order.
    pub classes: Vec<String>,

    /// The seed used to shuffle, for [`RunOrder::Random`].
    pub seed: Option<u64>,
}

/// Finds test classes under a directory.
///
/// An entry whose relative path matches the includes and none of the excludes is a class; matching
/// directories are not descended into. Class names replace path separators with `.`.
#[derive(Debug)]
pub struct DirectoryScanner<'a> {
    params: &'a DirectoryScannerParameters,
    history: Option<&'a RunHistory>,
    includes: GlobSet,
    excludes: GlobSet,
    specific_tests: GlobSet,
}

impl<'a> DirectoryScanner<'a> {
    /// Compiles the patterns in `params`.
    pub fn new(params: &'a DirectoryScannerParameters) -> Result<Self, ProviderError> {
        let includes = if params.includes.is_empty() {
            build_glob_set(&default_includes())?
        } else {
            build_glob_set(&params.includes)?
        };
        Ok(Self {
            params,
            history: None,
            includes,
            excludes: build_glob_set(&params.excludes)?,
            specific_tests: build_glob_set(&params.specific_tests)?,
        })
    }

    /// Orders classes by `history` for run orders that depend on earlier runs.
    pub fn with_history(mut self, history: &'a RunHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Scans the test classes directory. A missing directory yields no classes.
    pub fn scan(&self) -> Result<ScanResult, ProviderError> {
        let root = &self.params.test_classes_dir;
        let mut classes = Vec::new();
        if root.is_dir() {
            self.walk(root, Utf8Path::new(""), &mut classes)?;
        } else {
            debug!(%root, "test classes directory does not exist");
        }

        let seed = self.sort(&mut classes);
        Ok(ScanResult { classes, seed })
    }

    fn walk(
        &self,
        dir: &Utf8Path,
        relative: &Utf8Path,
        classes: &mut Vec<String>,
    ) -> Result<(), ProviderError> {
        let scan_err = |err| ProviderError::Scan {
            dir: dir.to_owned(),
            err,
        };
        for entry in dir.read_dir_utf8().map_err(scan_err)? {
            let entry = entry.map_err(scan_err)?;
            let relative = relative.join(entry.file_name());
            let file_type = entry.file_type().map_err(scan_err)?;

            if self.is_included(&relative) {
                let class_name = class_name_of(&relative);
                if self.is_selected(&class_name) {
                    classes.push(class_name);
                }
            } else if file_type.is_dir() {
                self.walk(entry.path(), &relative, classes)?;
            }
        }
        Ok(())
    }

    fn is_included(&self, relative: &Utf8Path) -> bool {
        self.includes.is_match(relative.as_std_path())
            && !self.excludes.is_match(relative.as_std_path())
    }

    fn is_selected(&self, class_name: &str) -> bool {
        if self.params.specific_tests.is_empty() {
            return true;
        }
        let simple_name = crate::helpers::simple_class_name(class_name);
        self.specific_tests.is_match(class_name) || self.specific_tests.is_match(simple_name)
    }

    fn sort(&self, classes: &mut [String]) -> Option<u64> {
        match self.params.run_order {
            RunOrder::Filesystem => None,
            RunOrder::Alphabetical => {
                classes.sort();
                None
            }
            RunOrder::ReverseAlphabetical => {
                classes.sort_by(|a, b| b.cmp(a));
                None
            }
            RunOrder::Random => {
                let seed = self.params.run_order_seed.unwrap_or_else(rand::random);
                // Sort first so the seed alone determines the order.
                classes.sort();
                classes.shuffle(&mut StdRng::seed_from_u64(seed));
                Some(seed)
            }
            RunOrder::FailedFirst => {
                // Classes that never ran count as failed.
                classes.sort();
                classes.sort_by_key(|class| {
                    self.history
                        .and_then(|h| h.get(class))
                        .map_or(0, |c| c.successful_runs)
                });
                None
            }
            RunOrder::Balanced => {
                classes.sort();
                classes.sort_by_key(|class| {
                    Reverse(
                        self.history
                            .and_then(|h| h.get(class))
                            .map_or(0, |c| c.elapsed_millis),
                    )
                });
                None
            }
            RunOrder::Hourly => {
                sort_hourly(classes, Local::now().hour());
                None
            }
        }
    }
}

fn sort_hourly(classes: &mut [String], hour: u32) {
    if hour % 2 == 0 {
        classes.sort();
    } else {
        classes.sort_by(|a, b| b.cmp(a));
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, ProviderError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| ProviderError::InvalidPattern {
            pattern: pattern.clone(),
            err,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| ProviderError::InvalidPattern {
        pattern: patterns.join(", "),
        err,
    })
}

fn class_name_of(relative: &Utf8Path) -> String {
    relative
        .components()
        .map(|component| component.as_str())
        .collect::<Vec<_>>()
        .join(".")
}
