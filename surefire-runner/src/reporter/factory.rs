// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{
    ConsoleOutputEcho, ConsoleOutputFileReporter, ConsoleReporter, ConsoleWriter, FileReporter,
    Reporter, ReporterManager, RunResult, RunStatistics, XmlReporter, console::run_header,
    manager::NamedReporter,
};
use crate::{
    booter::{ComponentDefinition, TypedParam},
    errors::ProviderError,
    helpers::plural,
};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use std::{
    fmt::Write as _,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use surefire_metadata::RunHistory;
use tracing::warn;

/// Settings shared by every reporter of a run.
#[derive(Clone, Debug)]
pub struct ReporterContext {
    /// Where report files go.
    pub reports_dir: Utf8PathBuf,

    /// Whether traces are trimmed to the test class.
    pub trim_stack_trace: bool,

    /// Whether test output goes to files instead of the console.
    pub redirect_test_output_to_file: bool,

    /// The console.
    pub console: ConsoleWriter,
}

/// Builds a reporter from its parameters.
pub type ReporterConstructor =
    fn(&ReporterContext, &[TypedParam]) -> Result<Box<dyn Reporter>, ProviderError>;

/// Reporters known by name.
#[derive(Clone, Debug)]
pub struct ReporterRegistry {
    constructors: IndexMap<String, ReporterConstructor>,
}

impl Default for ReporterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ReporterRegistry {
    /// Names of the reporters used when none are configured.
    pub const DEFAULT_REPORTERS: &'static [&'static str] = &["console", "file", "xml"];

    /// Creates a registry without any reporters.
    pub fn empty() -> Self {
        Self {
            constructors: IndexMap::new(),
        }
    }

    /// Creates a registry with the built-in reporters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("console", console);
        registry.register("console-detailed", console_detailed);
        registry.register("file", file);
        registry.register("xml", xml);
        registry.register("console-output-file", console_output_file);
        registry
    }

    /// Registers a reporter, replacing any reporter with the same name.
    pub fn register(&mut self, name: impl Into<String>, constructor: ReporterConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// The registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.constructors.keys().map(String::as_str)
    }

    /// Instantiates the reporter described by `definition`.
    pub fn create(
        &self,
        context: &ReporterContext,
        definition: &ComponentDefinition,
    ) -> Result<Box<dyn Reporter>, ProviderError> {
        let constructor = self.constructors.get(&definition.name).ok_or_else(|| {
            ProviderError::UnknownReporter {
                name: definition.name.clone(),
                known: self.names().map(str::to_owned).collect(),
            }
        })?;
        constructor(context, &definition.params)
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ProviderError {
    ProviderError::InvalidReporterParams {
        name: name.to_owned(),
        reason: reason.into(),
    }
}

fn bool_param(name: &str, params: &[TypedParam], default: bool) -> Result<bool, ProviderError> {
    match params {
        [] => Ok(default),
        [param] => param
            .as_bool()
            .ok_or_else(|| invalid(name, format!("expected a boolean, found {}", param.tag()))),
        _ => Err(invalid(name, "expected at most one parameter")),
    }
}

fn dir_param(
    name: &str,
    context: &ReporterContext,
    params: &[TypedParam],
) -> Result<Utf8PathBuf, ProviderError> {
    match params {
        [] => Ok(context.reports_dir.clone()),
        [param] => param
            .as_file()
            .cloned()
            .ok_or_else(|| invalid(name, format!("expected a file, found {}", param.tag()))),
        _ => Err(invalid(name, "expected at most one parameter")),
    }
}

fn console(
    context: &ReporterContext,
    params: &[TypedParam],
) -> Result<Box<dyn Reporter>, ProviderError> {
    let detailed = bool_param("console", params, false)?;
    Ok(Box::new(ConsoleReporter::new(
        context.console.clone(),
        detailed,
        context.trim_stack_trace,
    )))
}

fn console_detailed(
    context: &ReporterContext,
    params: &[TypedParam],
) -> Result<Box<dyn Reporter>, ProviderError> {
    if !params.is_empty() {
        return Err(invalid("console-detailed", "takes no parameters"));
    }
    Ok(Box::new(ConsoleReporter::new(
        context.console.clone(),
        true,
        context.trim_stack_trace,
    )))
}

fn file(
    context: &ReporterContext,
    params: &[TypedParam],
) -> Result<Box<dyn Reporter>, ProviderError> {
    let dir = dir_param("file", context, params)?;
    Ok(Box::new(FileReporter::new(dir, context.trim_stack_trace)))
}

fn xml(
    context: &ReporterContext,
    params: &[TypedParam],
) -> Result<Box<dyn Reporter>, ProviderError> {
    let dir = dir_param("xml", context, params)?;
    Ok(Box::new(XmlReporter::new(dir, context.trim_stack_trace)))
}

fn console_output_file(
    context: &ReporterContext,
    params: &[TypedParam],
) -> Result<Box<dyn Reporter>, ProviderError> {
    let dir = dir_param("console-output-file", context, params)?;
    Ok(Box::new(ConsoleOutputFileReporter::new(dir)))
}

/// Creates reporter managers for a run and aggregates their statistics.
///
/// The first manager created for a run announces it. Call [`Self::close`] once at the end.
#[derive(Debug)]
pub struct ReporterFactory {
    context: ReporterContext,
    definitions: Vec<ComponentDefinition>,
    registry: Arc<ReporterRegistry>,
    statistics: Arc<RunStatistics>,
    history: Arc<Mutex<RunHistory>>,
    emits_run_events: bool,
    run_started: AtomicBool,
    run_completed: AtomicBool,
    lock: Mutex<()>,
}

impl ReporterFactory {
    /// Creates a top-level factory.
    ///
    /// An empty `definitions` list selects [`ReporterRegistry::DEFAULT_REPORTERS`].
    pub fn new(
        context: ReporterContext,
        definitions: Vec<ComponentDefinition>,
        registry: Arc<ReporterRegistry>,
    ) -> Self {
        let definitions = if definitions.is_empty() {
            ReporterRegistry::DEFAULT_REPORTERS
                .iter()
                .map(|name| ComponentDefinition::new(*name))
                .collect()
        } else {
            definitions
        };
        Self {
            context,
            definitions,
            registry,
            statistics: Arc::new(RunStatistics::new()),
            history: Arc::new(Mutex::new(RunHistory::default())),
            emits_run_events: true,
            run_started: AtomicBool::new(false),
            run_completed: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    /// Creates a factory for one fork. It shares the reporters and run history of `self` but
    /// keeps its own statistics and never announces the run.
    pub fn for_fork(&self) -> Self {
        Self {
            context: self.context.clone(),
            definitions: self.definitions.clone(),
            registry: self.registry.clone(),
            statistics: Arc::new(RunStatistics::new()),
            history: self.history.clone(),
            emits_run_events: false,
            run_started: AtomicBool::new(false),
            run_completed: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    /// The reporter context.
    pub fn context(&self) -> &ReporterContext {
        &self.context
    }

    /// The statistics of this factory.
    pub fn statistics(&self) -> &Arc<RunStatistics> {
        &self.statistics
    }

    /// The test sets completed so far, as one run of history.
    pub fn run_history(&self) -> RunHistory {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Creates a manager for one execution context.
    pub fn create_reporter_manager(&self) -> Result<ReporterManager, ProviderError> {
        let mut reporters = Vec::with_capacity(self.definitions.len() + 1);
        for definition in &self.definitions {
            reporters.push(NamedReporter {
                name: definition.name.clone(),
                reporter: self.registry.create(&self.context, definition)?,
            });
        }
        if !self
            .definitions
            .iter()
            .any(|d| d.name == "console-output-file")
        {
            let reporter: Box<dyn Reporter> = if self.context.redirect_test_output_to_file {
                Box::new(ConsoleOutputFileReporter::new(
                    self.context.reports_dir.clone(),
                ))
            } else {
                Box::new(ConsoleOutputEcho::new(self.context.console.clone()))
            };
            reporters.push(NamedReporter {
                name: "console-output".to_owned(),
                reporter,
            });
        }

        self.run_starting();
        Ok(ReporterManager::new(reporters, self.statistics.clone())
            .with_history(self.history.clone()))
    }

    /// Announces the run, once. Does nothing for fork factories.
    pub fn run_starting(&self) {
        if !self.emits_run_events || self.run_started.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.run_started.load(Ordering::Relaxed) {
            return;
        }
        self.run_started.store(true, Ordering::Release);
        self.write_console(&run_header());
    }

    /// The result of the run so far.
    pub fn run_result(&self) -> RunResult {
        self.statistics.to_run_result()
    }

    /// Finishes the run and returns its result. Prints the summary for top-level factories.
    pub fn close(&self) -> RunResult {
        let result = self.run_result();
        self.run_completed(&result);
        result
    }

    /// Prints the summary of `result`, once. Does nothing for fork factories.
    pub fn run_completed(&self, result: &RunResult) {
        if !self.emits_run_events {
            return;
        }
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.run_completed.swap(true, Ordering::AcqRel) {
            return;
        }
        if result.counts.completed == 0 && result.failure.is_none() {
            warn!("There are no tests to run.");
        }
        self.write_console(&results_summary(result));
    }

    fn write_console(&self, text: &str) {
        if let Err(error) = self.context.console.write_lines(text) {
            warn!(%error, "failed to write to the console");
        }
    }
}

/// The `Results :` block printed at the end of a run.
pub fn results_summary(result: &RunResult) -> String {
    let mut out = String::from("\nResults :\n");
    let mut section = |title: &str, tests: &[String]| {
        if !tests.is_empty() {
            _ = writeln!(out, "\n{title}:");
            for test in tests {
                _ = writeln!(out, "  {test}");
            }
        }
    };
    section("Failed tests", &result.failure_sources);
    section("Tests in error", &result.error_sources);
    section("Flaked tests", &result.flake_sources);

    if let Some(failure) = &result.failure {
        _ = writeln!(out, "\n{failure}");
    }
    if result.timeout {
        _ = writeln!(out, "\nThere was a timeout in the fork");
    }

    let counts = result.counts;
    _ = write!(
        out,
        "\nTests run: {}, Failures: {}, Errors: {}, Skipped: {}",
        counts.completed, counts.failures, counts.errors, counts.skipped
    );
    if counts.flakes > 0 {
        _ = write!(out, ", Flakes: {}", counts.flakes);
    }
    _ = writeln!(out);
    if counts.completed > 0 {
        _ = writeln!(
            out,
            "{} {} {}",
            counts.completed,
            plural::tests_str(counts.completed),
            if result.is_success() { "passed" } else { "ran with problems" },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{RunListener, SimpleReportEntry, TestCounts, test_helpers::SharedBuffer};
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn context(dir: &Utf8TempDir, buffer: &SharedBuffer) -> ReporterContext {
        ReporterContext {
            reports_dir: dir.path().to_owned(),
            trim_stack_trace: true,
            redirect_test_output_to_file: false,
            console: ConsoleWriter::new(buffer.clone()),
        }
    }

    #[test]
    fn header_is_printed_once() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let buffer = SharedBuffer::default();
        let factory = ReporterFactory::new(
            context(&dir, &buffer),
            vec![ComponentDefinition::new("console")],
            Arc::new(ReporterRegistry::default()),
        );
        let _first = factory.create_reporter_manager().expect("created");
        let _second = factory.create_reporter_manager().expect("created");
        assert_eq!(buffer.contents().matches("T E S T S").count(), 1);

        let fork = factory.for_fork();
        let _third = fork.create_reporter_manager().expect("created");
        fork.close();
        assert_eq!(buffer.contents().matches("T E S T S").count(), 1);
        assert!(!buffer.contents().contains("Results :"));
    }

    #[test]
    fn close_prints_results_once() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let buffer = SharedBuffer::default();
        let factory = ReporterFactory::new(
            context(&dir, &buffer),
            vec![ComponentDefinition::new("console")],
            Arc::new(ReporterRegistry::default()),
        );
        let mut manager = factory.create_reporter_manager().expect("created");
        let set = SimpleReportEntry::test_set("org.x.ATest");
        manager.test_set_starting(&set);
        let failing = SimpleReportEntry::test("org.x.ATest", "second").with_message("boom");
        manager.test_starting(&failing);
        manager.test_failed(&failing);
        manager.test_set_completed(&set);

        let result = factory.close();
        factory.close();
        assert_eq!(result.counts.failures, 1);
        let contents = buffer.contents();
        assert_eq!(contents.matches("Results :").count(), 1);
        assert!(
            contents.ends_with(indoc! {"
                Results :

                Failed tests:
                  org.x.ATest.second

                Tests run: 1, Failures: 1, Errors: 0, Skipped: 0
                1 test ran with problems
            "}),
            "{contents}"
        );
    }

    #[test]
    fn forks_share_the_run_history() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let buffer = SharedBuffer::default();
        let factory = ReporterFactory::new(
            context(&dir, &buffer),
            vec![ComponentDefinition::new("console")],
            Arc::new(ReporterRegistry::default()),
        );
        for (class_name, fails) in [("org.x.ATest", false), ("org.x.BTest", true)] {
            let fork = factory.for_fork();
            let mut manager = fork.create_reporter_manager().expect("created");
            let set = SimpleReportEntry::test_set(class_name).with_elapsed(25);
            let test = SimpleReportEntry::test(class_name, "only");
            manager.test_set_starting(&set);
            manager.test_starting(&test);
            if fails {
                manager.test_failed(&test);
            } else {
                manager.test_succeeded(&test);
            }
            manager.test_set_completed(&set);
        }

        let history = factory.run_history();
        let runs: Vec<_> = history
            .classes
            .iter()
            .map(|(name, class)| (name.as_str(), class.successful_runs, class.elapsed_millis))
            .collect();
        assert_eq!(runs, vec![("org.x.ATest", 1, 25), ("org.x.BTest", 0, 25)]);
    }

    #[test]
    fn flaky_tests_pass_the_run() {
        let result = RunResult {
            counts: TestCounts {
                completed: 2,
                flakes: 1,
                ..TestCounts::default()
            },
            flake_sources: vec!["org.x.ATest.flaky".to_owned()],
            ..RunResult::default()
        };
        assert_eq!(
            results_summary(&result),
            indoc! {"

                Results :

                Flaked tests:
                  org.x.ATest.flaky

                Tests run: 2, Failures: 0, Errors: 0, Skipped: 0, Flakes: 1
                2 tests passed
            "}
        );
    }

    #[test]
    fn unknown_reporter() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let buffer = SharedBuffer::default();
        let factory = ReporterFactory::new(
            context(&dir, &buffer),
            vec![ComponentDefinition::new("html")],
            Arc::new(ReporterRegistry::default()),
        );
        let err = factory.create_reporter_manager().expect_err("unknown");
        assert!(
            matches!(err, ProviderError::UnknownReporter { ref name, .. } if name == "html"),
            "{err:?}"
        );
    }

    #[test]
    fn reporter_params_are_checked() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let buffer = SharedBuffer::default();
        let registry = ReporterRegistry::default();
        let context = context(&dir, &buffer);

        let ok = ComponentDefinition::new("file").with_param(TypedParam::File("out".into()));
        assert!(registry.create(&context, &ok).is_ok());
        let bad = ComponentDefinition::new("console").with_param(TypedParam::Integer(3));
        assert!(matches!(
            registry.create(&context, &bad),
            Err(ProviderError::InvalidReporterParams { .. })
        ));
    }
}
