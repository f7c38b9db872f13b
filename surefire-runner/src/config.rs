// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! User configuration for surefire.
//!
//! Configuration is read from `.config/surefire.toml` under the workspace root and layered on top
//! of the defaults in `default-config.toml`. Most settings live in profiles: `[profile.default]`
//! always exists, and other profiles only override the keys they set.

use crate::{
    booter::{BooterConfiguration, ComponentDefinition, Properties},
    channel::Shutdown,
    classpath::{Classpath, ClasspathConfiguration},
    dump::DumpWriter,
    errors::{ConfigParseError, ProfileNotFound},
    fork::{ForkConfiguration, ForkMode},
    process_checker::ProcessCheckerType,
    provider::{DirectoryScannerParameters, RunOrder},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{collections::BTreeMap, time::Duration};

/// Overall configuration for surefire.
///
/// Runner settings are obtained through [profiles](SurefireProfile), see [`Self::profile`].
#[derive(Clone, Debug)]
pub struct SurefireConfig {
    workspace_root: Utf8PathBuf,
    inner: SurefireConfigImpl,
}

impl SurefireConfig {
    /// The default location of the config within the workspace root.
    pub const CONFIG_PATH: &'static str = ".config/surefire.toml";

    /// The default config as a TOML file. User configuration is layered on top of it.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the configuration for `workspace_root`.
    ///
    /// If `file` is `None`, `.config/surefire.toml` is read if it exists. An explicitly passed file
    /// must exist.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let inner = Self::build_and_deserialize_config(&builder)
            .map_err(|err| ConfigParseError::new(&config_file, err))?;
        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the configuration made of defaults only.
    pub fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let inner = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        Self {
            workspace_root: workspace_root.into(),
            inner,
        }
    }

    /// The workspace root paths in the configuration are relative to.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the profile named `name`.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<SurefireProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = if name == Self::DEFAULT_PROFILE {
            None
        } else {
            let profile = self
                .inner
                .other_profiles
                .get(name)
                .ok_or_else(|| ProfileNotFound::new(name, self.all_profiles()))?;
            Some(profile)
        };

        Ok(SurefireProfile {
            name: name.to_owned(),
            workspace_root: &self.workspace_root,
            default_profile: &self.inner.default_profile,
            custom_profile,
        })
    }

    /// The names of all profiles.
    pub fn all_profiles(&self) -> impl Iterator<Item = &str> + '_ {
        std::iter::once(Self::DEFAULT_PROFILE)
            .chain(self.inner.other_profiles.keys().map(String::as_str))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<SurefireConfigImpl, ConfigError> {
        let config: SurefireConfigDeserialize = builder.build_cloned()?.try_deserialize()?;
        let ProfilesDeserialize { default, other } = config.profile;
        check_durations(
            Self::DEFAULT_PROFILE,
            Some(default.ping_interval),
            Some(default.forked_process_exit_timeout),
        )?;
        for (name, profile) in &other {
            check_durations(
                name,
                profile.ping_interval,
                profile.forked_process_exit_timeout,
            )?;
        }
        Ok(SurefireConfigImpl {
            default_profile: default,
            other_profiles: other,
        })
    }
}

/// Pings and exit waits can't be instantaneous.
fn check_durations(
    profile: &str,
    ping_interval: Option<Duration>,
    exit_timeout: Option<Duration>,
) -> Result<(), ConfigError> {
    for (key, value) in [
        ("ping-interval", ping_interval),
        ("forked-process-exit-timeout", exit_timeout),
    ] {
        if value == Some(Duration::ZERO) {
            return Err(ConfigError::Message(format!(
                "profile.{profile}.{key} must be greater than zero"
            )));
        }
    }
    Ok(())
}

/// A surefire profile: the default profile with a custom profile's settings on top.
///
/// Returned by [`SurefireConfig::profile`].
#[derive(Clone, Debug)]
pub struct SurefireProfile<'cfg> {
    name: String,
    workspace_root: &'cfg Utf8Path,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

impl<'cfg> SurefireProfile<'cfg> {
    /// The name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The maximum number of forks running at once. 0 runs tests in process.
    pub fn fork_count(&self) -> usize {
        self.custom_profile
            .and_then(|p| p.fork_count)
            .unwrap_or(self.default_profile.fork_count)
    }

    /// Whether forks are reused for more than one class.
    pub fn reuse_forks(&self) -> bool {
        self.custom_profile
            .and_then(|p| p.reuse_forks)
            .unwrap_or(self.default_profile.reuse_forks)
    }

    /// The fork mode derived from [`Self::fork_count`] and [`Self::reuse_forks`].
    pub fn fork_mode(&self) -> ForkMode {
        ForkMode::from_count(self.fork_count(), self.reuse_forks())
    }

    /// How long a fork may run, if limited.
    pub fn forked_process_timeout(&self) -> Option<Duration> {
        self.custom_profile
            .and_then(|p| p.forked_process_timeout)
            .or(self.default_profile.forked_process_timeout)
    }

    /// How long a fork gets to exit.
    pub fn forked_process_exit_timeout(&self) -> Duration {
        self.custom_profile
            .and_then(|p| p.forked_process_exit_timeout)
            .unwrap_or(self.default_profile.forked_process_exit_timeout)
    }

    /// The interval between pings and liveness checks.
    pub fn ping_interval(&self) -> Duration {
        self.custom_profile
            .and_then(|p| p.ping_interval)
            .unwrap_or(self.default_profile.ping_interval)
    }

    /// The reports directory, resolved against the workspace root.
    pub fn reports_dir(&self) -> Utf8PathBuf {
        let dir = self
            .custom_profile
            .and_then(|p| p.reports_directory.as_deref())
            .unwrap_or(&self.default_profile.reports_directory);
        self.workspace_root.join(dir)
    }

    /// Whether a run without tests fails.
    pub fn fail_if_no_tests(&self) -> bool {
        self.custom_profile
            .and_then(|p| p.fail_if_no_tests)
            .unwrap_or(self.default_profile.fail_if_no_tests)
    }

    /// Whether test output is redirected to files.
    pub fn redirect_test_output_to_file(&self) -> bool {
        self.custom_profile
            .and_then(|p| p.redirect_test_output_to_file)
            .unwrap_or(self.default_profile.redirect_test_output_to_file)
    }

    /// The shutdown policy of forks.
    pub fn shutdown(&self) -> Shutdown {
        self.custom_profile
            .and_then(|p| p.shutdown)
            .unwrap_or(self.default_profile.shutdown)
    }

    /// How forks check on their parent.
    pub fn process_checker(&self) -> ProcessCheckerType {
        self.custom_profile
            .and_then(|p| p.process_checker)
            .unwrap_or(self.default_profile.process_checker)
    }

    /// The provider running tests.
    pub fn provider(&self) -> &'cfg str {
        self.custom_profile
            .and_then(|p| p.provider.as_deref())
            .unwrap_or(&self.default_profile.provider)
    }

    /// Include patterns for test classes.
    pub fn includes(&self) -> &'cfg [String] {
        self.custom_profile
            .and_then(|p| p.includes.as_deref())
            .unwrap_or(&self.default_profile.includes)
    }

    /// Exclude patterns for test classes.
    pub fn excludes(&self) -> &'cfg [String] {
        self.custom_profile
            .and_then(|p| p.excludes.as_deref())
            .unwrap_or(&self.default_profile.excludes)
    }

    /// The order test classes run in.
    pub fn run_order(&self) -> RunOrder {
        self.custom_profile
            .and_then(|p| p.run_order)
            .unwrap_or(self.default_profile.run_order)
    }

    /// The test classes directory, resolved against the workspace root.
    pub fn test_classes_dir(&self) -> Utf8PathBuf {
        let dir = self
            .custom_profile
            .and_then(|p| p.test_classes_directory.as_deref())
            .unwrap_or(&self.default_profile.test_classes_directory);
        self.workspace_root.join(dir)
    }

    /// The test classpath. The test classes directory always comes first.
    pub fn test_classpath(&self) -> Classpath {
        let elements = self
            .custom_profile
            .and_then(|p| p.test_classpath.as_deref())
            .unwrap_or(&self.default_profile.test_classpath);
        let mut classpath = Classpath::new([self.test_classes_dir().as_str()]);
        for element in elements {
            classpath.push(self.workspace_root.join(element).as_str());
        }
        classpath
    }

    /// The provider classpath.
    pub fn provider_classpath(&self) -> Classpath {
        let elements = self
            .custom_profile
            .and_then(|p| p.provider_classpath.as_deref())
            .unwrap_or(&self.default_profile.provider_classpath);
        Classpath::new(
            elements
                .iter()
                .map(|element| self.workspace_root.join(element).into_string()),
        )
    }

    /// Whether test loaders look up classes child-first.
    pub fn child_delegation(&self) -> bool {
        self.custom_profile
            .and_then(|p| p.child_delegation)
            .unwrap_or(self.default_profile.child_delegation)
    }

    /// Whether the system loader carries the test classpath.
    pub fn use_system_class_loader(&self) -> bool {
        self.custom_profile
            .and_then(|p| p.use_system_class_loader)
            .unwrap_or(self.default_profile.use_system_class_loader)
    }

    /// Whether assertions are enabled in tests.
    pub fn enable_assertions(&self) -> bool {
        self.custom_profile
            .and_then(|p| p.enable_assertions)
            .unwrap_or(self.default_profile.enable_assertions)
    }

    /// The reporters, by name.
    pub fn reporters(&self) -> &'cfg [String] {
        self.custom_profile
            .and_then(|p| p.reporters.as_deref())
            .unwrap_or(&self.default_profile.reporters)
    }

    /// Whether stack traces are trimmed.
    pub fn trim_stack_trace(&self) -> bool {
        self.custom_profile
            .and_then(|p| p.trim_stack_trace)
            .unwrap_or(self.default_profile.trim_stack_trace)
    }

    /// The number of failures after which remaining tests are skipped.
    pub fn skip_after_failure_count(&self) -> usize {
        self.custom_profile
            .and_then(|p| p.skip_after_failure_count)
            .unwrap_or(self.default_profile.skip_after_failure_count)
    }

    /// How often a failing test is run again.
    pub fn rerun_failing_tests_count(&self) -> usize {
        self.custom_profile
            .and_then(|p| p.rerun_failing_tests_count)
            .unwrap_or(self.default_profile.rerun_failing_tests_count)
    }

    /// Whether booter properties files are kept.
    pub fn keep_booter_files(&self) -> bool {
        self.custom_profile
            .and_then(|p| p.keep_booter_files)
            .unwrap_or(self.default_profile.keep_booter_files)
    }

    /// System properties: the default profile's, overridden key by key by the custom profile's.
    pub fn system_properties(&self) -> Properties {
        let mut properties: Properties = self
            .default_profile
            .system_properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(custom) = self.custom_profile {
            for (key, value) in &custom.system_properties {
                properties.set(key.as_str(), value.as_str());
            }
        }
        properties
    }

    /// Builds the configuration handed to forks.
    pub fn booter_configuration(&self) -> BooterConfiguration {
        BooterConfiguration {
            classpath: ClasspathConfiguration {
                test_classpath: self.test_classpath(),
                provider_classpath: self.provider_classpath(),
                boot_classpath: Classpath::empty(),
                child_delegation: self.child_delegation(),
                use_system_class_loader: self.use_system_class_loader(),
                enable_assertions: self.enable_assertions(),
            },
            provider: self.provider().to_owned(),
            reporters: self
                .reporters()
                .iter()
                .map(ComponentDefinition::new)
                .collect(),
            test_suites: Vec::new(),
            scanner: DirectoryScannerParameters {
                test_classes_dir: self.test_classes_dir(),
                includes: self.includes().to_vec(),
                excludes: self.excludes().to_vec(),
                specific_tests: Vec::new(),
                run_order: self.run_order(),
                run_order_seed: None,
            },
            reports_dir: self.reports_dir(),
            trim_stack_trace: self.trim_stack_trace(),
            redirect_test_output_to_file: self.redirect_test_output_to_file(),
            fail_if_no_tests: self.fail_if_no_tests(),
            skip_after_failure_count: self.skip_after_failure_count(),
            rerun_failing_tests_count: self.rerun_failing_tests_count(),
            shutdown: self.shutdown(),
            process_checker: self.process_checker(),
            fork_number: 1,
            dump_stamp: DumpWriter::new_stamp(),
            ping_interval: self.ping_interval(),
            exit_timeout: self.forked_process_exit_timeout(),
            system_properties: self.system_properties(),
        }
    }

    /// Builds the fork settings, starting `executable` for every fork.
    pub fn fork_configuration(&self, executable: impl Into<Utf8PathBuf>) -> ForkConfiguration {
        ForkConfiguration {
            mode: self.fork_mode(),
            fork_count: self.fork_count().max(1),
            executable: executable.into(),
            timeout: self.forked_process_timeout(),
            exit_timeout: self.forked_process_exit_timeout(),
            ping_interval: self.ping_interval(),
            keep_booter_files: self.keep_booter_files(),
        }
    }
}

#[derive(Clone, Debug)]
struct SurefireConfigImpl {
    default_profile: DefaultProfileImpl,
    other_profiles: BTreeMap<String, CustomProfileImpl>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SurefireConfigDeserialize {
    profile: ProfilesDeserialize,
}

#[derive(Clone, Debug, Deserialize)]
struct ProfilesDeserialize {
    default: DefaultProfileImpl,
    #[serde(flatten)]
    other: BTreeMap<String, CustomProfileImpl>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DefaultProfileImpl {
    fork_count: usize,
    reuse_forks: bool,
    #[serde(default, with = "humantime_serde")]
    forked_process_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    forked_process_exit_timeout: Duration,
    #[serde(with = "humantime_serde")]
    ping_interval: Duration,
    reports_directory: Utf8PathBuf,
    fail_if_no_tests: bool,
    redirect_test_output_to_file: bool,
    shutdown: Shutdown,
    process_checker: ProcessCheckerType,
    provider: String,
    includes: Vec<String>,
    excludes: Vec<String>,
    run_order: RunOrder,
    test_classes_directory: Utf8PathBuf,
    test_classpath: Vec<Utf8PathBuf>,
    provider_classpath: Vec<Utf8PathBuf>,
    child_delegation: bool,
    use_system_class_loader: bool,
    enable_assertions: bool,
    reporters: Vec<String>,
    trim_stack_trace: bool,
    skip_after_failure_count: usize,
    rerun_failing_tests_count: usize,
    keep_booter_files: bool,
    #[serde(default)]
    system_properties: IndexMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default)]
    fork_count: Option<usize>,
    #[serde(default)]
    reuse_forks: Option<bool>,
    #[serde(default, with = "humantime_serde")]
    forked_process_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    forked_process_exit_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    ping_interval: Option<Duration>,
    #[serde(default)]
    reports_directory: Option<Utf8PathBuf>,
    #[serde(default)]
    fail_if_no_tests: Option<bool>,
    #[serde(default)]
    redirect_test_output_to_file: Option<bool>,
    #[serde(default)]
    shutdown: Option<Shutdown>,
    #[serde(default)]
    process_checker: Option<ProcessCheckerType>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    includes: Option<Vec<String>>,
    #[serde(default)]
    excludes: Option<Vec<String>>,
    #[serde(default)]
    run_order: Option<RunOrder>,
    #[serde(default)]
    test_classes_directory: Option<Utf8PathBuf>,
    #[serde(default)]
    test_classpath: Option<Vec<Utf8PathBuf>>,
    #[serde(default)]
    provider_classpath: Option<Vec<Utf8PathBuf>>,
    #[serde(default)]
    child_delegation: Option<bool>,
    #[serde(default)]
    use_system_class_loader: Option<bool>,
    #[serde(default)]
    enable_assertions: Option<bool>,
    #[serde(default)]
    reporters: Option<Vec<String>>,
    #[serde(default)]
    trim_stack_trace: Option<bool>,
    #[serde(default)]
    skip_after_failure_count: Option<usize>,
    #[serde(default)]
    rerun_failing_tests_count: Option<usize>,
    #[serde(default)]
    keep_booter_files: Option<bool>,
    #[serde(default)]
    system_properties: IndexMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DisplayErrorChain;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs;
    use test_case::test_case;

    fn write_config(dir: &Utf8TempDir, contents: &str) {
        let path = dir.path().join(SurefireConfig::CONFIG_PATH);
        fs::create_dir_all(path.parent().expect("has parent")).expect("created .config");
        fs::write(&path, contents).expect("wrote config");
    }

    #[test]
    fn defaults_without_a_config_file() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let config = SurefireConfig::from_sources(dir.path(), None).expect("defaults parse");
        let profile = config.profile("default").expect("default profile exists");

        assert_eq!(profile.fork_mode(), ForkMode::Once);
        assert_eq!(profile.forked_process_timeout(), None);
        assert_eq!(profile.forked_process_exit_timeout(), Duration::from_secs(30));
        assert_eq!(profile.reports_dir(), dir.path().join("target/surefire-reports"));
        assert_eq!(profile.reporters(), ["console", "file", "xml"]);
        assert_eq!(profile.shutdown(), Shutdown::Default);
        assert_eq!(profile.process_checker(), ProcessCheckerType::All);
        assert!(profile.system_properties().is_empty());

        let booter = profile.booter_configuration();
        assert_eq!(booter.provider, "pojo");
        assert_eq!(
            booter.classpath.test_classpath.elements().collect::<Vec<_>>(),
            vec![dir.path().join("target/test-classes").as_str()]
        );
        assert!(!booter.dump_stamp.is_empty());
    }

    #[test]
    fn custom_profile_overrides_default() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        write_config(
            &dir,
            indoc! {r#"
                [profile.default]
                fork-count = 2
                skip-after-failure-count = 3

                [profile.default.system-properties]
                greeting = "hello"
                mode = "default"

                [profile.ci]
                reuse-forks = false
                forked-process-timeout = "5m"
                shutdown = "kill"
                reporters = ["console-detailed", "xml"]

                [profile.ci.system-properties]
                mode = "ci"
            "#},
        );
        let config = SurefireConfig::from_sources(dir.path(), None).expect("config parses");
        assert_eq!(config.all_profiles().collect::<Vec<_>>(), vec!["default", "ci"]);

        let default = config.profile("default").expect("default profile exists");
        assert_eq!(default.fork_mode(), ForkMode::Once);
        assert_eq!(default.fork_count(), 2);

        let ci = config.profile("ci").expect("ci profile exists");
        assert_eq!(ci.fork_mode(), ForkMode::Always);
        assert_eq!(ci.fork_count(), 2);
        assert_eq!(ci.skip_after_failure_count(), 3);
        assert_eq!(ci.shutdown(), Shutdown::Kill);
        assert_eq!(ci.reporters(), ["console-detailed", "xml"]);

        let fork = ci.fork_configuration("/bin/surefire");
        assert_eq!(fork.timeout, Some(Duration::from_secs(300)));
        assert_eq!(fork.executable, "/bin/surefire");

        let properties = ci.system_properties();
        assert_eq!(properties.get("greeting"), Some("hello"));
        assert_eq!(properties.get("mode"), Some("ci"));
    }

    #[test]
    fn in_process_when_fork_count_is_zero() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        write_config(&dir, "[profile.default]\nfork-count = 0\n");
        let config = SurefireConfig::from_sources(dir.path(), None).expect("config parses");
        let profile = config.profile("default").expect("default profile exists");
        assert_eq!(profile.fork_mode(), ForkMode::Never);
        assert_eq!(profile.fork_configuration("surefire").fork_count, 1);
    }

    #[test]
    fn unknown_profile() {
        let config = SurefireConfig::default_config("/ws");
        let error = config.profile("nightly").expect_err("profile doesn't exist");
        assert_eq!(
            error.to_string(),
            "profile `nightly` not found (known profiles: default)"
        );
    }

    #[test]
    fn invalid_values_are_reported() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        write_config(&dir, "[profile.default]\nshutdown = \"sometimes\"\n");
        let error = SurefireConfig::from_sources(dir.path(), None).expect_err("invalid shutdown");
        assert_eq!(
            error.config_file(),
            &dir.path().join(SurefireConfig::CONFIG_PATH)
        );
    }

    #[test_case("default", "ping-interval" ; "default ping interval")]
    #[test_case("ci", "ping-interval" ; "custom ping interval")]
    #[test_case("ci", "forked-process-exit-timeout" ; "custom exit timeout")]
    fn zero_durations_are_rejected(profile: &str, key: &str) {
        let dir = Utf8TempDir::new().expect("created temp dir");
        write_config(&dir, &format!("[profile.{profile}]\n{key} = \"0s\"\n"));
        let error = SurefireConfig::from_sources(dir.path(), None).expect_err("zero duration");
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            format!(
                "failed to parse surefire config at `{}`\n  caused by:\n  - \
                 profile.{profile}.{key} must be greater than zero",
                dir.path().join(SurefireConfig::CONFIG_PATH)
            )
        );
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let missing = dir.path().join("missing.toml");
        SurefireConfig::from_sources(dir.path(), Some(&missing)).expect_err("file is required");
    }
}
