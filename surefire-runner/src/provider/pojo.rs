// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{DirectoryScanner, Provider, ProviderParameters, load_run_history};
use crate::{
    errors::{DisplayErrorChain, ProviderError},
    helpers::simple_class_name,
    reporter::{
        OutputStream, RunListener, SimpleReportEntry, StackTraceWriter, TestOutputWriter,
    },
    time::stopwatch,
};
use camino::{Utf8Path, Utf8PathBuf};
use duct::cmd;
use std::{fs, io::Write, process::Output};
use tracing::debug;

/// Runs plain executables as tests.
///
/// A test class resolves to a filesystem entry through the test class loader. An executable file
/// is a test set with a single test. A directory is a test set whose executable entries are its
/// tests, in name order. A test passes if it exits with status 0, fails with any other status and
/// errors if it can't be spawned.
///
/// A failing or erroring test is run again up to `rerun_failing_tests_count` times, until it
/// passes. Every run is reported.
#[derive(Debug)]
pub struct PojoProvider {
    params: ProviderParameters,
}

impl PojoProvider {
    /// The name this provider is registered under.
    pub const NAME: &'static str = "pojo";

    /// Creates the provider.
    pub fn new(params: ProviderParameters) -> Self {
        Self { params }
    }

    pub(super) fn create(params: ProviderParameters) -> Result<Box<dyn Provider>, ProviderError> {
        Ok(Box::new(Self::new(params)))
    }

    fn run_class(&self, class_name: &str, listener: &mut dyn RunListener) {
        let set_watch = stopwatch();
        let test_set = SimpleReportEntry::test_set(class_name)
            .with_system_properties(self.system_properties_map());
        listener.test_set_starting(&test_set);

        match self.params.test_loader.load_class(class_name) {
            Ok(class) => {
                for (name, path) in tests_of(&class.location) {
                    self.run_test(class_name, &name, &path, listener);
                }
            }
            Err(error) => {
                let entry = SimpleReportEntry::test(class_name, simple_class_name(class_name))
                    .with_message(DisplayErrorChain::new(&error).to_string());
                listener.test_starting(&entry);
                listener.test_error(&entry);
            }
        }

        let completed = test_set.with_elapsed(set_watch.snapshot().elapsed_millis());
        listener.test_set_completed(&completed);
    }

    fn run_test(
        &self,
        class_name: &str,
        test_name: &str,
        path: &Utf8Path,
        listener: &mut dyn RunListener,
    ) {
        let entry = SimpleReportEntry::test(class_name, test_name);
        if self.params.skip_requested.is_raised() {
            let skipped = entry.with_message("skipped after too many failures");
            listener.test_starting(&skipped);
            listener.test_skipped(&skipped);
            return;
        }

        for _ in 0..=self.params.rerun_failing_tests_count {
            if self.run_once(class_name, test_name, &entry, path, listener) {
                break;
            }
        }
    }

    /// Runs the test once and reports the outcome. Returns true if it passed.
    fn run_once(
        &self,
        class_name: &str,
        test_name: &str,
        entry: &SimpleReportEntry,
        path: &Utf8Path,
        listener: &mut dyn RunListener,
    ) -> bool {
        listener.test_starting(entry);
        let watch = stopwatch();
        let mut expression = cmd!(path.as_std_path())
            .env("SUREFIRE_TEST_CLASS", class_name)
            .env("SUREFIRE_TEST_NAME", test_name)
            .stdout_capture()
            .stderr_capture()
            .stdin_null()
            .unchecked();
        if let Some(dir) = path.parent() {
            expression = expression.dir(dir.as_std_path());
        }
        for (key, value) in &self.params.system_properties {
            expression = expression.env(key, value);
        }
        let result = expression.run();
        let elapsed = watch.snapshot().elapsed_millis();

        match result {
            Ok(output) => {
                write_output(listener, &output);
                let entry = entry.clone().with_elapsed(elapsed);
                if output.status.success() {
                    listener.test_succeeded(&entry);
                    true
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let message = format!("test exited with {}", output.status);
                    let trace = StackTraceWriter::new(
                        Some(class_name.to_owned()),
                        Some(message.clone()),
                        format!("{message}\n{}", stderr.trim_end()),
                    );
                    listener.test_failed(&entry.with_message(message).with_stack_trace(trace));
                    false
                }
            }
            Err(error) => {
                debug!(%path, %error, "failed to spawn test");
                let message = format!("failed to spawn `{path}`: {error}");
                listener.test_error(&entry.clone().with_elapsed(elapsed).with_message(message));
                false
            }
        }
    }

    fn system_properties_map(&self) -> indexmap::IndexMap<String, String> {
        self.params
            .system_properties
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }
}

impl Provider for PojoProvider {
    fn suites(&self) -> Result<Vec<String>, ProviderError> {
        if let Some(classes) = self.params.suite_classes() {
            return Ok(classes);
        }
        let scanner = DirectoryScanner::new(&self.params.scanner)?;
        if self.params.scanner.run_order.uses_history() {
            let history = load_run_history(&self.params.reports_dir);
            return Ok(scanner.with_history(&history).scan()?.classes);
        }
        Ok(scanner.scan()?.classes)
    }

    fn invoke(
        &mut self,
        classes: &mut dyn Iterator<Item = String>,
        listener: &mut dyn RunListener,
    ) -> Result<(), ProviderError> {
        for class_name in classes {
            self.run_class(&class_name, listener);
        }
        Ok(())
    }
}

fn write_output(listener: &mut dyn RunListener, output: &Output) {
    for (stream, bytes) in [
        (OutputStream::Stdout, &output.stdout),
        (OutputStream::Stderr, &output.stderr),
    ] {
        if !bytes.is_empty() {
            // Writes to a listener can't fail.
            _ = TestOutputWriter::new(listener, stream).write_all(bytes);
        }
    }
}

/// The tests of the entry at `location`, as (name, path) pairs.
fn tests_of(location: &Utf8Path) -> Vec<(String, Utf8PathBuf)> {
    if !location.is_dir() {
        let name = location.file_name().unwrap_or(location.as_str()).to_owned();
        return vec![(name, location.to_owned())];
    }

    let Ok(entries) = location.read_dir_utf8() else {
        return Vec::new();
    };
    let mut tests: Vec<_> = entries
        .filter_map(Result::ok)
        .filter(|entry| is_executable(entry.path()))
        .map(|entry| (entry.file_name().to_owned(), entry.path().to_owned()))
        .collect();
    tests.sort();
    tests
}

#[cfg(unix)]
fn is_executable(path: &Utf8Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(windows)]
fn is_executable(path: &Utf8Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file())
        && matches!(
            path.extension().map(str::to_ascii_lowercase).as_deref(),
            Some("exe" | "bat" | "cmd")
        )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        booter::{BooterConfiguration, Properties},
        classpath::Classpath,
        provider::SkipFlag,
        reporter::test_helpers::RecordingListener,
    };
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    fn script(path: &Utf8Path, body: &str) {
        fs::create_dir_all(path.parent().expect("has parent")).expect("created dirs");
        fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("wrote script");
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("made executable");
    }

    fn provider(dir: &Utf8TempDir, skip: SkipFlag) -> PojoProvider {
        let mut system_properties = Properties::new();
        system_properties.set("GREETING", "hello");
        let mut config = BooterConfiguration::default();
        config.classpath.test_classpath = Classpath::new([dir.path().as_str()]);
        config.scanner.test_classes_dir = dir.path().to_owned();
        config.system_properties = system_properties;
        PojoProvider::new(ProviderParameters::from_config(&config, skip))
    }

    #[test]
    fn runs_files_and_directories() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        script(&dir.path().join("org/x/SingleTest"), "echo \"$GREETING\"");
        script(&dir.path().join("org/x/SuiteTest/a_passes"), "exit 0");
        script(&dir.path().join("org/x/SuiteTest/b_fails"), "echo oops >&2; exit 3");
        fs::write(dir.path().join("org/x/SuiteTest/README"), "not a test").expect("wrote");

        let mut provider = provider(&dir, SkipFlag::new());
        let mut classes = vec![
            "org.x.SingleTest".to_owned(),
            "org.x.SuiteTest".to_owned(),
            "org.x.MissingTest".to_owned(),
        ]
        .into_iter();
        let mut listener = RecordingListener::default();
        provider
            .invoke(&mut classes, &mut listener)
            .expect("provider ran");

        assert_eq!(
            listener.events,
            vec![
                "set-starting: org.x.SingleTest",
                "starting: org.x.SingleTest.SingleTest",
                "stdout: hello\n",
                "Succeeded: org.x.SingleTest.SingleTest",
                "set-completed: org.x.SingleTest",
                "set-starting: org.x.SuiteTest",
                "starting: org.x.SuiteTest.a_passes",
                "Succeeded: org.x.SuiteTest.a_passes",
                "starting: org.x.SuiteTest.b_fails",
                "stderr: oops\n",
                "Failed: org.x.SuiteTest.b_fails",
                "set-completed: org.x.SuiteTest",
                "set-starting: org.x.MissingTest",
                "starting: org.x.MissingTest.MissingTest",
                "Error: org.x.MissingTest.MissingTest",
                "set-completed: org.x.MissingTest",
            ]
        );
    }

    #[test]
    fn raised_skip_flag_skips_tests() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        script(&dir.path().join("OnlyTest"), "exit 1");
        let skip = SkipFlag::new();
        skip.raise();
        let mut provider = provider(&dir, skip);
        let mut listener = RecordingListener::default();
        provider
            .invoke(&mut std::iter::once("OnlyTest".to_owned()), &mut listener)
            .expect("provider ran");
        assert!(listener.events.contains(&"Skipped: OnlyTest.OnlyTest".to_owned()));
    }

    #[test]
    fn suites_are_scanned() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        script(&dir.path().join("org/x/BTest"), "exit 0");
        script(&dir.path().join("org/x/ATest"), "exit 0");
        let mut provider = provider(&dir, SkipFlag::new());
        provider.params.scanner.run_order = crate::provider::RunOrder::Alphabetical;
        assert_eq!(
            provider.suites().expect("scanned"),
            vec!["org.x.ATest", "org.x.BTest"]
        );
    }

    #[test]
    fn failed_first_reads_the_reports_dir() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        script(&dir.path().join("org/x/BTest"), "exit 0");
        script(&dir.path().join("org/x/ATest"), "exit 0");
        let reports = Utf8TempDir::new().expect("created temp dir");
        let mut history = surefire_metadata::RunHistory::default();
        history.record("org.x.ATest", true, 1);
        history.record("org.x.BTest", false, 1);
        fs::write(
            reports.path().join(surefire_metadata::RunHistory::FILE_NAME),
            history.to_json().expect("serialized"),
        )
        .expect("wrote history");

        let mut provider = provider(&dir, SkipFlag::new());
        provider.params.scanner.run_order = crate::provider::RunOrder::FailedFirst;
        provider.params.reports_dir = reports.path().to_owned();
        assert_eq!(
            provider.suites().expect("scanned"),
            vec!["org.x.BTest", "org.x.ATest"]
        );
    }

    #[test]
    fn failing_tests_are_rerun_until_they_pass() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let marker = dir.path().join("ran-once");
        script(
            &dir.path().join("org/x/FlakyTest"),
            &format!("if [ -e {marker} ]; then exit 0; fi\ntouch {marker}\nexit 1"),
        );
        script(&dir.path().join("org/x/BrokenTest"), "exit 4");

        let mut provider = provider(&dir, SkipFlag::new());
        provider.params.rerun_failing_tests_count = 2;
        let mut classes = vec!["org.x.FlakyTest".to_owned(), "org.x.BrokenTest".to_owned()];
        let mut listener = RecordingListener::default();
        provider
            .invoke(&mut classes.drain(..), &mut listener)
            .expect("provider ran");

        assert_eq!(
            listener.events,
            vec![
                "set-starting: org.x.FlakyTest",
                "starting: org.x.FlakyTest.FlakyTest",
                "Failed: org.x.FlakyTest.FlakyTest",
                "starting: org.x.FlakyTest.FlakyTest",
                "Succeeded: org.x.FlakyTest.FlakyTest",
                "set-completed: org.x.FlakyTest",
                "set-starting: org.x.BrokenTest",
                "starting: org.x.BrokenTest.BrokenTest",
                "Failed: org.x.BrokenTest.BrokenTest",
                "starting: org.x.BrokenTest.BrokenTest",
                "Failed: org.x.BrokenTest.BrokenTest",
                "starting: org.x.BrokenTest.BrokenTest",
                "Failed: org.x.BrokenTest.BrokenTest",
                "set-completed: org.x.BrokenTest",
            ]
        );
    }
}
