// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Booter configuration and the properties file it's handed to forks in.
//!
//! The parent serializes a [`BooterConfiguration`] into a flat [`Properties`] document, writes it
//! to a temporary file and passes the path to the forked process. The child reads it back with
//! [`BooterDeserializer`] and boots from it.

mod configuration;
mod forked;
mod properties;
mod serializer;
mod typed;

pub use configuration::*;
pub use forked::*;
pub use properties::*;
pub use serializer::*;
pub use typed::*;

/// Keys used in the booter properties file.
pub mod keys {
    /// Prefix of the test classpath elements.
    pub const TEST_CLASSPATH: &str = "classPathUrl.";
    /// Prefix of the provider classpath elements.
    pub const PROVIDER_CLASSPATH: &str = "surefireClassPathUrl.";
    /// Prefix of the boot classpath elements.
    pub const BOOT_CLASSPATH: &str = "surefireBootClassPathUrl.";
    /// Prefix of reporter definitions.
    pub const REPORT: &str = "report.";
    /// Prefix of test suite definitions.
    pub const TEST_SUITE: &str = "testSuite.";
    /// The provider name.
    pub const PROVIDER: &str = "providerConfiguration";
    /// The directory tests are scanned from.
    pub const TEST_CLASSES_DIRECTORY: &str = "testClassesDirectory";
    /// Prefix of include patterns.
    pub const INCLUDES: &str = "includes.";
    /// Prefix of exclude patterns.
    pub const EXCLUDES: &str = "excludes.";
    /// Prefix of specific tests.
    pub const SPECIFIC_TESTS: &str = "specificTest.";
    /// The run order.
    pub const RUN_ORDER: &str = "runOrder";
    /// The seed for the random run order.
    pub const RUN_ORDER_SEED: &str = "runOrderRandomSeed";
    /// Whether an empty run fails.
    pub const FAIL_IF_NO_TESTS: &str = "failIfNoTests";
    /// Whether assertions are enabled.
    pub const ENABLE_ASSERTIONS: &str = "enableAssertions";
    /// Whether loaders delegate child-first.
    pub const CHILD_DELEGATION: &str = "childDelegation";
    /// Whether tests use the system loader.
    pub const USE_SYSTEM_CLASS_LOADER: &str = "useSystemClassLoader";
    /// Whether test output goes to files.
    pub const REDIRECT_TEST_OUTPUT_TO_FILE: &str = "redirectTestOutputToFile";
    /// Whether stack traces are trimmed to the test class.
    pub const TRIM_STACK_TRACE: &str = "trimStackTrace";
    /// The reports directory.
    pub const REPORTS_DIRECTORY: &str = "reportsDirectory";
    /// The failure count after which remaining tests are skipped.
    pub const SKIP_AFTER_FAILURE_COUNT: &str = "skipAfterFailureCount";
    /// How often failing tests are rerun.
    pub const RERUN_FAILING_TESTS_COUNT: &str = "rerunFailingTestsCount";
    /// The shutdown policy.
    pub const SHUTDOWN: &str = "shutdown";
    /// The liveness checker to use.
    pub const PROCESS_CHECKER: &str = "processChecker";
    /// The number of the fork.
    pub const FORK_NUMBER: &str = "forkNumber";
    /// The stamp dump files are prefixed with.
    pub const DUMP_STAMP: &str = "dumpStamp";
    /// The interval of parent liveness checks and pings, in milliseconds.
    pub const PING_INTERVAL_MILLIS: &str = "pingIntervalMillis";
    /// How long a fork waits for `BYE_ACK` before exiting anyway, in milliseconds.
    pub const EXIT_TIMEOUT_MILLIS: &str = "exitTimeoutMillis";
    /// System properties, as a nested properties document.
    pub const SYSTEM_PROPERTIES: &str = "systemProperties";
}
