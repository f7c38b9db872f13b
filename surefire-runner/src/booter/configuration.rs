// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{ComponentDefinition, Properties};
use crate::{
    channel::Shutdown, classpath::ClasspathConfiguration, process_checker::ProcessCheckerType,
    provider::DirectoryScannerParameters,
};
use camino::Utf8PathBuf;
use std::time::Duration;

/// The default interval between parent liveness checks and NOOP pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// The shortest ping interval in effect. Shorter intervals, including zero, are raised to it.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// The default time a fork waits for `BYE_ACK` after saying goodbye.
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a forked process needs to run its share of the tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BooterConfiguration {
    /// The classpaths and loader settings.
    pub classpath: ClasspathConfiguration,

    /// The name of the provider running the tests.
    pub provider: String,

    /// The reporters to instantiate, in order.
    pub reporters: Vec<ComponentDefinition>,

    /// Test suites handed to the provider.
    pub test_suites: Vec<ComponentDefinition>,

    /// Where tests are found and in which order they run.
    pub scanner: DirectoryScannerParameters,

    /// The directory reports and dump files are written to.
    pub reports_dir: Utf8PathBuf,

    /// Whether stack traces are trimmed to frames of the test class.
    pub trim_stack_trace: bool,

    /// Whether test output is written to per-set files instead of the console.
    pub redirect_test_output_to_file: bool,

    /// Whether a run without tests fails.
    pub fail_if_no_tests: bool,

    /// After this many failures and errors remaining tests are skipped. 0 disables skipping.
    pub skip_after_failure_count: usize,

    /// How often a failing test is run again before it counts as failed.
    pub rerun_failing_tests_count: usize,

    /// What the fork does when asked to shut down or when its parent is gone.
    pub shutdown: Shutdown,

    /// How the fork checks that its parent is alive.
    pub process_checker: ProcessCheckerType,

    /// The number of this fork, starting at 1.
    pub fork_number: u32,

    /// The prefix of dump file names.
    pub dump_stamp: String,

    /// The interval between liveness checks.
    pub ping_interval: Duration,

    /// How long the fork waits for `BYE_ACK`.
    pub exit_timeout: Duration,

    /// System properties visible to tests, passed to them as environment variables.
    pub system_properties: Properties,
}

impl Default for BooterConfiguration {
    fn default() -> Self {
        Self {
            classpath: ClasspathConfiguration::default(),
            provider: "pojo".to_owned(),
            reporters: Vec::new(),
            test_suites: Vec::new(),
            scanner: DirectoryScannerParameters::default(),
            reports_dir: Utf8PathBuf::from("target/surefire-reports"),
            trim_stack_trace: true,
            redirect_test_output_to_file: false,
            fail_if_no_tests: false,
            skip_after_failure_count: 0,
            rerun_failing_tests_count: 0,
            shutdown: Shutdown::default(),
            process_checker: ProcessCheckerType::default(),
            fork_number: 1,
            dump_stamp: String::new(),
            ping_interval: DEFAULT_PING_INTERVAL,
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
            system_properties: Properties::new(),
        }
    }
}

impl BooterConfiguration {
    /// Returns a copy of this configuration for fork number `fork_number`.
    pub fn for_fork(&self, fork_number: u32) -> Self {
        Self {
            fork_number,
            ..self.clone()
        }
    }
}
