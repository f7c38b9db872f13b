// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-class results of earlier runs, kept next to the reports.
///
/// The `failedfirst` and `balanced` run orders read it to decide which classes go first.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunHistory {
    /// History by class name.
    #[serde(default)]
    pub classes: BTreeMap<String, ClassHistory>,
}

/// What is known about one test class.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClassHistory {
    /// The number of runs in a row, up to the latest one, without failures or errors.
    pub successful_runs: u32,

    /// How long the latest run of the class took, in milliseconds.
    pub elapsed_millis: u64,
}

impl RunHistory {
    /// The name of the history file inside the reports directory.
    pub const FILE_NAME: &'static str = "surefire-run-history.json";

    /// Records one run of `class_name`, replacing an earlier record of the same run.
    pub fn record(&mut self, class_name: impl Into<String>, passed: bool, elapsed_millis: u64) {
        self.classes.insert(
            class_name.into(),
            ClassHistory {
                successful_runs: u32::from(passed),
                elapsed_millis,
            },
        );
    }

    /// Folds the records of a later run into this history.
    ///
    /// A passing class extends its streak of successful runs, a failing one resets it. Classes
    /// that didn't run in `latest` keep what they had.
    pub fn merge(&mut self, latest: &RunHistory) {
        for (class_name, run) in &latest.classes {
            let entry = self.classes.entry(class_name.clone()).or_default();
            entry.successful_runs = if run.successful_runs > 0 {
                entry.successful_runs.saturating_add(1)
            } else {
                0
            };
            entry.elapsed_millis = run.elapsed_millis;
        }
    }

    /// The history of `class_name`, if it ever ran.
    pub fn get(&self, class_name: &str) -> Option<&ClassHistory> {
        self.classes.get(class_name)
    }

    /// Serializes the history as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a history from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn merge_tracks_streaks() {
        let mut history = RunHistory::default();
        for passed in [true, true, false, true] {
            let mut latest = RunHistory::default();
            latest.record("org.x.ATest", passed, 12);
            latest.record("org.x.BTest", true, 40);
            history.merge(&latest);
        }
        assert_eq!(
            history.get("org.x.ATest"),
            Some(&ClassHistory {
                successful_runs: 1,
                elapsed_millis: 12
            })
        );
        assert_eq!(history.get("org.x.BTest").map(|c| c.successful_runs), Some(4));
        assert_eq!(history.get("org.x.CTest"), None);
    }

    #[test]
    fn history_json_uses_kebab_case() {
        let mut history = RunHistory::default();
        history.record("org.x.ATest", false, 7);
        let json = history.to_json().expect("serialization succeeds");
        assert!(json.contains("\"successful-runs\": 0"), "json: {json}");
        assert!(json.contains("\"elapsed-millis\": 7"), "json: {json}");
        assert_eq!(RunHistory::from_json(&json).expect("parse succeeds"), history);
    }
}
