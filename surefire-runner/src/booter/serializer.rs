// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{BooterConfiguration, ComponentDefinition, Properties, keys};
use crate::{
    classpath::{Classpath, ClasspathConfiguration},
    errors::BooterConfigError,
    provider::{DirectoryScannerParameters, RunOrder},
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::{Builder, Utf8TempPath};
use std::{fs, io::Write, time::Duration};
use tracing::debug;

const HEADER: &str = "surefire booter configuration";

/// Writes booter configurations to properties files.
#[derive(Debug)]
pub struct BooterSerializer<'a> {
    config: &'a BooterConfiguration,
}

impl<'a> BooterSerializer<'a> {
    /// Creates a serializer for `config`.
    pub fn new(config: &'a BooterConfiguration) -> Self {
        Self { config }
    }

    /// Flattens the configuration into properties.
    pub fn to_properties(&self) -> Properties {
        let config = self.config;
        let mut props = Properties::new();

        let classpath = &config.classpath;
        classpath
            .test_classpath
            .write_to(&mut props, keys::TEST_CLASSPATH);
        classpath
            .provider_classpath
            .write_to(&mut props, keys::PROVIDER_CLASSPATH);
        classpath
            .boot_classpath
            .write_to(&mut props, keys::BOOT_CLASSPATH);
        props.set_bool(keys::CHILD_DELEGATION, classpath.child_delegation);
        props.set_bool(
            keys::USE_SYSTEM_CLASS_LOADER,
            classpath.use_system_class_loader,
        );
        props.set_bool(keys::ENABLE_ASSERTIONS, classpath.enable_assertions);

        props.set(keys::PROVIDER, config.provider.as_str());
        ComponentDefinition::write_all(&mut props, keys::REPORT, &config.reporters);
        ComponentDefinition::write_all(&mut props, keys::TEST_SUITE, &config.test_suites);

        let scanner = &config.scanner;
        props.set(
            keys::TEST_CLASSES_DIRECTORY,
            scanner.test_classes_dir.as_str(),
        );
        props.set_list(keys::INCLUDES, &scanner.includes);
        props.set_list(keys::EXCLUDES, &scanner.excludes);
        props.set_list(keys::SPECIFIC_TESTS, &scanner.specific_tests);
        props.set(keys::RUN_ORDER, scanner.run_order.as_str());
        if let Some(seed) = scanner.run_order_seed {
            props.set(keys::RUN_ORDER_SEED, seed.to_string());
        }

        props.set(keys::REPORTS_DIRECTORY, config.reports_dir.as_str());
        props.set_bool(keys::TRIM_STACK_TRACE, config.trim_stack_trace);
        props.set_bool(
            keys::REDIRECT_TEST_OUTPUT_TO_FILE,
            config.redirect_test_output_to_file,
        );
        props.set_bool(keys::FAIL_IF_NO_TESTS, config.fail_if_no_tests);
        props.set(
            keys::SKIP_AFTER_FAILURE_COUNT,
            config.skip_after_failure_count.to_string(),
        );
        props.set(
            keys::RERUN_FAILING_TESTS_COUNT,
            config.rerun_failing_tests_count.to_string(),
        );
        props.set(keys::SHUTDOWN, config.shutdown.as_str());
        props.set(keys::PROCESS_CHECKER, config.process_checker.to_string());
        props.set(keys::FORK_NUMBER, config.fork_number.to_string());
        props.set(keys::DUMP_STAMP, config.dump_stamp.as_str());
        props.set(
            keys::PING_INTERVAL_MILLIS,
            config.ping_interval.as_millis().to_string(),
        );
        props.set(
            keys::EXIT_TIMEOUT_MILLIS,
            config.exit_timeout.as_millis().to_string(),
        );
        if !config.system_properties.is_empty() {
            props.set(
                keys::SYSTEM_PROPERTIES,
                config.system_properties.to_document(None),
            );
        }

        props
    }

    /// Writes the configuration to a new temporary file in `dir`.
    ///
    /// The file is deleted when the returned path is dropped.
    pub fn write_temp_file(&self, dir: &Utf8Path) -> Result<Utf8TempPath, BooterConfigError> {
        fs::create_dir_all(dir).map_err(|err| BooterConfigError::Write { err })?;
        let mut file = Builder::new()
            .prefix("surefire")
            .suffix("tmp")
            .tempfile_in(dir)
            .map_err(|err| BooterConfigError::Write { err })?;
        self.to_properties()
            .write_to(&mut file, Some(HEADER))
            .and_then(|()| file.flush())
            .map_err(|err| BooterConfigError::Write { err })?;
        debug!(path = %file.path(), "wrote booter configuration");
        Ok(file.into_temp_path())
    }
}

/// Reads booter configurations back from properties files.
#[derive(Debug)]
pub struct BooterDeserializer {
    props: Properties,
}

impl BooterDeserializer {
    /// Reads the properties file at `path`.
    pub fn from_file(path: &Utf8Path) -> Result<Self, BooterConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| BooterConfigError::Read {
            path: path.to_owned(),
            err,
        })?;
        Ok(Self {
            props: Properties::parse(&contents)?,
        })
    }

    /// Wraps already parsed properties.
    pub fn from_properties(props: Properties) -> Self {
        Self { props }
    }

    /// The raw properties.
    pub fn properties(&self) -> &Properties {
        &self.props
    }

    /// Rebuilds the configuration.
    pub fn deserialize(&self) -> Result<BooterConfiguration, BooterConfigError> {
        let props = &self.props;
        let defaults = BooterConfiguration::default();

        let classpath = ClasspathConfiguration {
            test_classpath: Classpath::read_from(props, keys::TEST_CLASSPATH),
            provider_classpath: Classpath::read_from(props, keys::PROVIDER_CLASSPATH),
            boot_classpath: Classpath::read_from(props, keys::BOOT_CLASSPATH),
            child_delegation: props.get_bool(keys::CHILD_DELEGATION),
            use_system_class_loader: props.get_bool(keys::USE_SYSTEM_CLASS_LOADER),
            enable_assertions: props.get_bool(keys::ENABLE_ASSERTIONS),
        };

        let scanner = DirectoryScannerParameters {
            test_classes_dir: props
                .get(keys::TEST_CLASSES_DIRECTORY)
                .map_or(defaults.scanner.test_classes_dir, Utf8PathBuf::from),
            includes: props.get_list(keys::INCLUDES),
            excludes: props.get_list(keys::EXCLUDES),
            specific_tests: props.get_list(keys::SPECIFIC_TESTS),
            run_order: parse_or_default::<RunOrder>(props, keys::RUN_ORDER)?,
            run_order_seed: props.get_int(keys::RUN_ORDER_SEED)?,
        };

        let system_properties = match props.get(keys::SYSTEM_PROPERTIES) {
            Some(document) => Properties::parse(document)?,
            None => Properties::new(),
        };

        Ok(BooterConfiguration {
            classpath,
            provider: props.require(keys::PROVIDER)?.to_owned(),
            reporters: ComponentDefinition::read_all(props, keys::REPORT)?,
            test_suites: ComponentDefinition::read_all(props, keys::TEST_SUITE)?,
            scanner,
            reports_dir: Utf8PathBuf::from(props.require(keys::REPORTS_DIRECTORY)?),
            trim_stack_trace: props.get_bool(keys::TRIM_STACK_TRACE),
            redirect_test_output_to_file: props.get_bool(keys::REDIRECT_TEST_OUTPUT_TO_FILE),
            fail_if_no_tests: props.get_bool(keys::FAIL_IF_NO_TESTS),
            skip_after_failure_count: props
                .get_int(keys::SKIP_AFTER_FAILURE_COUNT)?
                .unwrap_or(0),
            rerun_failing_tests_count: props
                .get_int(keys::RERUN_FAILING_TESTS_COUNT)?
                .unwrap_or(0),
            shutdown: parse_or_default(props, keys::SHUTDOWN)?,
            process_checker: parse_or_default(props, keys::PROCESS_CHECKER)?,
            fork_number: props.get_int(keys::FORK_NUMBER)?.unwrap_or(1),
            dump_stamp: props.get(keys::DUMP_STAMP).unwrap_or_default().to_owned(),
            ping_interval: props
                .get_int(keys::PING_INTERVAL_MILLIS)?
                .map_or(defaults.ping_interval, Duration::from_millis),
            exit_timeout: props
                .get_int(keys::EXIT_TIMEOUT_MILLIS)?
                .map_or(defaults.exit_timeout, Duration::from_millis),
            system_properties,
        })
    }
}

fn parse_or_default<T>(props: &Properties, key: &str) -> Result<T, BooterConfigError>
where
    T: std::str::FromStr<Err = String> + Default,
{
    match props.get(key) {
        Some(value) => value
            .parse()
            .map_err(|reason| BooterConfigError::InvalidValue {
                key: key.to_owned(),
                value: value.to_owned(),
                reason,
            }),
        None => Ok(T::default()),
    }
}
