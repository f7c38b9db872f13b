// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use std::{io::Write, sync::Arc, time::Duration};
use surefire_runner::{
    booter::{
        BooterConfiguration, BooterSerializer, ComponentDefinition, TypedParam, run_forked_booter,
    },
    config::{SurefireConfig, SurefireProfile},
    fork::{ForkConfiguration, ForkMode, ForkStarter},
    provider::RunOrder,
    reporter::{ConsoleWriter, ReporterContext, ReporterFactory, ReporterRegistry},
};
use tracing::{debug, info};

/// Runs test classes in forked processes and reports on them.
#[derive(Debug, Parser)]
#[command(version, name = "surefire", styles = clap_styles::style())]
pub struct SurefireApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl SurefireApp {
    /// Initializes logging and colors.
    pub fn init_output(&self) -> OutputContext {
        match &self.command {
            Command::ForkedBooter { .. } => OutputContext::color_never_init(),
            Command::Run(_) | Command::ShowConfig(_) => self.output.init(),
        }
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output),
            Command::ShowConfig(opts) => opts.exec(),
            Command::ForkedBooter {
                properties_file,
                ppid,
            } => Ok(run_forked_booter(&properties_file, &ppid)),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tests
    ///
    /// Finds test classes under the test classes directory (or takes the classes passed on the
    /// command line), and runs them in forked processes according to the selected profile.
    Run(RunOpts),

    /// Show the booter configuration a profile resolves to
    ///
    /// Prints the properties document forks are started with.
    ShowConfig(ShowConfigOpts),

    /// Entry point of a forked process
    #[command(name = "forked-booter", hide = true)]
    ForkedBooter {
        /// The booter properties file
        properties_file: Utf8PathBuf,

        /// The PID of the process that started this fork
        ppid: String,
    },
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// The workspace root [default: current directory]
    #[arg(long, value_name = "DIR")]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: workspace-root/.config/surefire.toml]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Surefire profile to use
    #[arg(
        long,
        short = 'P',
        env = "SUREFIRE_PROFILE",
        default_value = SurefireConfig::DEFAULT_PROFILE
    )]
    profile: String,
}

impl ConfigOpts {
    fn make_config(&self) -> Result<SurefireConfig> {
        let workspace_root = match &self.workspace_root {
            Some(root) => root.clone(),
            None => {
                let dir = std::env::current_dir().map_err(ExpectedError::current_dir_failed)?;
                Utf8PathBuf::try_from(dir).map_err(|err| {
                    ExpectedError::WorkspaceRootInvalidUtf8 {
                        path: err.into_path_buf(),
                    }
                })?
            }
        };
        Ok(SurefireConfig::from_sources(
            workspace_root,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[command(flatten)]
    config_opts: ConfigOpts,

    /// Test classes to run [default: scan the test classes directory]
    #[arg(value_name = "CLASSES")]
    classes: Vec<String>,

    /// Only run classes matching these patterns
    #[arg(long, short = 't', value_name = "PATTERN", help_heading = "FILTER OPTIONS")]
    test: Vec<String>,

    /// Number of forks running at once, 0 to run tests in process
    #[arg(long, value_name = "N", help_heading = "FORK OPTIONS")]
    fork_count: Option<usize>,

    /// Start a new fork for every test class
    #[arg(long, help_heading = "FORK OPTIONS", overrides_with = "reuse_forks")]
    no_reuse_forks: bool,

    /// Run every class of a fork in the same process (default)
    #[arg(long, help_heading = "FORK OPTIONS", overrides_with = "no_reuse_forks")]
    reuse_forks: bool,

    /// Shut forks down after this long, e.g. "10m"
    #[arg(
        long,
        value_name = "DURATION",
        value_parser = humantime::parse_duration,
        help_heading = "FORK OPTIONS"
    )]
    forked_process_timeout: Option<Duration>,

    /// Skip remaining tests after this many failures and errors
    #[arg(long, value_name = "N", help_heading = "RUNNER OPTIONS")]
    skip_after_failure_count: Option<usize>,

    /// Run failing tests again up to N times; tests passing on a rerun are flaky
    #[arg(long, value_name = "N", help_heading = "RUNNER OPTIONS")]
    rerun_failing_tests_count: Option<usize>,

    /// Fail the run if no tests were found
    #[arg(long, help_heading = "RUNNER OPTIONS")]
    fail_if_no_tests: bool,

    /// The order test classes run in
    #[arg(long, value_name = "ORDER", help_heading = "RUNNER OPTIONS")]
    run_order: Option<RunOrder>,

    /// Seed for the random run order
    #[arg(long, value_name = "SEED", help_heading = "RUNNER OPTIONS")]
    run_order_seed: Option<u64>,

    /// Directory reports are written to
    #[arg(long, value_name = "DIR", help_heading = "REPORTER OPTIONS")]
    reports_directory: Option<Utf8PathBuf>,

    /// Write test output to files instead of the console
    #[arg(long, help_heading = "REPORTER OPTIONS")]
    redirect_test_output_to_file: bool,

    /// Keep booter properties files after forks exit
    #[arg(long, hide = true)]
    keep_booter_files: bool,
}

impl RunOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.config_opts.make_config()?;
        let profile = config.profile(&self.config_opts.profile)?;

        let booter = self.booter_configuration(&profile);
        let fork = self.fork_configuration(&profile, current_exe()?);
        if output.verbose {
            info!(
                profile = profile.name(),
                mode = %fork.mode,
                fork_count = fork.fork_count,
                "starting run"
            );
        }

        let mut console = ConsoleWriter::stdout();
        if output.colorize_stdout() {
            console = console.colorize();
        }
        let factory = ReporterFactory::new(
            ReporterContext {
                reports_dir: booter.reports_dir.clone(),
                trim_stack_trace: booter.trim_stack_trace,
                redirect_test_output_to_file: booter.redirect_test_output_to_file,
                console,
            },
            booter.reporters.clone(),
            Arc::new(ReporterRegistry::with_builtins()),
        );

        let fail_if_no_tests = booter.fail_if_no_tests;
        let reports_dir = booter.reports_dir.clone();
        let result = ForkStarter::new(booter, fork, Arc::new(factory)).run()?;
        debug!(%reports_dir, "run finished");
        Ok(result.exit_code(fail_if_no_tests))
    }

    fn booter_configuration(&self, profile: &SurefireProfile<'_>) -> BooterConfiguration {
        let mut booter = profile.booter_configuration();
        self.apply_to(&mut booter);
        booter
    }

    /// Overrides the settings of `booter` that were passed on the command line.
    fn apply_to(&self, booter: &mut BooterConfiguration) {
        if !self.classes.is_empty() {
            booter.test_suites = vec![
                ComponentDefinition::new("classes")
                    .with_param(TypedParam::StringList(self.classes.clone())),
            ];
        }
        if !self.test.is_empty() {
            booter.scanner.specific_tests = self.test.clone();
        }
        if let Some(run_order) = self.run_order {
            booter.scanner.run_order = run_order;
        }
        if let Some(seed) = self.run_order_seed {
            booter.scanner.run_order_seed = Some(seed);
        }
        if let Some(count) = self.skip_after_failure_count {
            booter.skip_after_failure_count = count;
        }
        if let Some(count) = self.rerun_failing_tests_count {
            booter.rerun_failing_tests_count = count;
        }
        if let Some(dir) = &self.reports_directory {
            booter.reports_dir = cwd_relative(dir);
        }
        booter.fail_if_no_tests |= self.fail_if_no_tests;
        booter.redirect_test_output_to_file |= self.redirect_test_output_to_file;
    }

    fn fork_configuration(
        &self,
        profile: &SurefireProfile<'_>,
        executable: Utf8PathBuf,
    ) -> ForkConfiguration {
        let fork_count = self.fork_count.unwrap_or_else(|| profile.fork_count());
        let reuse_forks = if self.no_reuse_forks {
            false
        } else if self.reuse_forks {
            true
        } else {
            profile.reuse_forks()
        };

        let mut fork = profile.fork_configuration(executable);
        fork.mode = ForkMode::from_count(fork_count, reuse_forks);
        fork.fork_count = fork_count.max(1);
        if let Some(timeout) = self.forked_process_timeout {
            fork.timeout = Some(timeout);
        }
        fork.keep_booter_files |= self.keep_booter_files;
        fork
    }
}

#[derive(Debug, Args)]
struct ShowConfigOpts {
    #[command(flatten)]
    config_opts: ConfigOpts,
}

impl ShowConfigOpts {
    fn exec(self) -> Result<i32> {
        let config = self.config_opts.make_config()?;
        let profile = config.profile(&self.config_opts.profile)?;
        let booter = profile.booter_configuration();
        let comment = format!("profile: {}", profile.name());
        let document = BooterSerializer::new(&booter)
            .to_properties()
            .to_document(Some(comment.as_str()));

        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(document.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(ExpectedError::write_output_error)?;
        Ok(0)
    }
}

/// Paths on the command line are relative to the working directory, not the workspace root.
fn cwd_relative(path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        return path.to_owned();
    }
    std::env::current_dir()
        .ok()
        .and_then(|dir| Utf8PathBuf::try_from(dir).ok())
        .map_or_else(|| path.to_owned(), |cwd| cwd.join(path))
}

fn current_exe() -> Result<Utf8PathBuf> {
    let exe = std::env::current_exe().map_err(ExpectedError::current_exe_failed)?;
    Utf8PathBuf::try_from(exe).map_err(|err| ExpectedError::CurrentExeInvalidUtf8 {
        path: err.into_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> SurefireApp {
        SurefireApp::try_parse_from(std::iter::once("surefire").chain(args.iter().copied()))
            .expect("arguments parse")
    }

    fn run_opts(args: &[&str]) -> RunOpts {
        match parse(args).command {
            Command::Run(opts) => opts,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn cli_overrides_profile() {
        let opts = run_opts(&[
            "run",
            "--fork-count",
            "3",
            "--no-reuse-forks",
            "--forked-process-timeout",
            "90s",
            "--skip-after-failure-count",
            "2",
            "--rerun-failing-tests-count",
            "1",
            "--run-order-seed",
            "99",
            "-t",
            "**/ATest",
            "--run-order",
            "alphabetical",
            "org.x.ATest",
        ]);
        let config = SurefireConfig::default_config("/ws");
        let profile = config.profile("default").expect("default profile exists");

        let fork = opts.fork_configuration(&profile, "/bin/surefire".into());
        assert_eq!(fork.mode, ForkMode::Always);
        assert_eq!(fork.fork_count, 3);
        assert_eq!(fork.timeout, Some(Duration::from_secs(90)));

        let booter = opts.booter_configuration(&profile);
        assert_eq!(booter.skip_after_failure_count, 2);
        assert_eq!(booter.rerun_failing_tests_count, 1);
        assert_eq!(booter.scanner.run_order_seed, Some(99));
        assert_eq!(booter.scanner.specific_tests, vec!["**/ATest"]);
        assert_eq!(booter.scanner.run_order, RunOrder::Alphabetical);
        assert_eq!(
            booter.test_suites,
            vec![
                ComponentDefinition::new("classes")
                    .with_param(TypedParam::StringList(vec!["org.x.ATest".to_owned()]))
            ]
        );
    }

    #[test]
    fn profile_applies_without_flags() {
        let opts = run_opts(&["run"]);
        let config = SurefireConfig::default_config("/ws");
        let profile = config.profile("default").expect("default profile exists");
        let fork = opts.fork_configuration(&profile, "/bin/surefire".into());
        assert_eq!(fork.mode, ForkMode::Once);
        assert_eq!(fork.timeout, None);
        assert!(opts.booter_configuration(&profile).test_suites.is_empty());
    }

    #[test]
    fn absent_flags_keep_configured_values() {
        let mut booter = BooterConfiguration::default();
        booter.scanner.specific_tests = vec!["**/BTest".to_owned()];
        booter.scanner.run_order_seed = Some(7);
        booter.rerun_failing_tests_count = 3;

        run_opts(&["run"]).apply_to(&mut booter);
        assert_eq!(booter.scanner.specific_tests, vec!["**/BTest"]);
        assert_eq!(booter.scanner.run_order_seed, Some(7));
        assert_eq!(booter.rerun_failing_tests_count, 3);
    }

    #[test]
    fn forked_booter_is_hidden_but_parses() {
        match parse(&["forked-booter", "/tmp/surefire.properties", "42"]).command {
            Command::ForkedBooter {
                properties_file,
                ppid,
            } => {
                assert_eq!(properties_file, "/tmp/surefire.properties");
                assert_eq!(ppid, "42");
            }
            other => panic!("expected forked-booter, got {other:?}"),
        }
    }
}
