// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Test providers: the code that actually runs tests.
//!
//! Providers are registered by name in a [`ProviderRegistry`] and instantiated from
//! [`ProviderParameters`]. A provider runs the classes it's handed one at a time and reports
//! through a [`RunListener`](crate::reporter::RunListener).

mod pojo;
mod scanner;

pub use pojo::*;
pub use scanner::*;

use crate::{
    booter::{BooterConfiguration, ComponentDefinition, Properties, TypedParam},
    classpath::ClassLoader,
    errors::ProviderError,
    reporter::RunListener,
};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Everything a provider is constructed from.
#[derive(Clone, Debug)]
pub struct ProviderParameters {
    /// The loader test classes resolve through.
    pub test_loader: Arc<dyn ClassLoader>,

    /// The loader the provider's own classes resolve through.
    pub provider_loader: Arc<dyn ClassLoader>,

    /// Where tests are scanned from.
    pub scanner: DirectoryScannerParameters,

    /// Test suite definitions.
    pub test_suites: Vec<ComponentDefinition>,

    /// System properties passed to tests.
    pub system_properties: Properties,

    /// Set once remaining tests should be skipped.
    pub skip_requested: SkipFlag,

    /// How often a failing test is run again.
    pub rerun_failing_tests_count: usize,

    /// The reports directory, where the history of earlier runs is kept.
    pub reports_dir: Utf8PathBuf,
}

impl ProviderParameters {
    /// Builds parameters from a booter configuration.
    pub fn from_config(config: &BooterConfiguration, skip_requested: SkipFlag) -> Self {
        let system = config.classpath.system_loader();
        Self {
            test_loader: config.classpath.test_loader(&system),
            provider_loader: config.classpath.provider_loader(&system),
            scanner: config.scanner.clone(),
            test_suites: config.test_suites.clone(),
            system_properties: config.system_properties.clone(),
            skip_requested,
            rerun_failing_tests_count: config.rerun_failing_tests_count,
            reports_dir: config.reports_dir.clone(),
        }
    }

    /// Classes listed explicitly by `StringList` parameters of the test suites.
    pub fn suite_classes(&self) -> Option<Vec<String>> {
        let mut classes = Vec::new();
        let mut found = false;
        for suite in &self.test_suites {
            for param in &suite.params {
                if let TypedParam::StringList(list) = param {
                    found = true;
                    classes.extend(list.iter().filter(|c| !c.is_empty()).cloned());
                }
            }
        }
        found.then_some(classes)
    }
}

/// A flag raised when the remaining tests of a run should be skipped. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct SkipFlag(Arc<AtomicBool>);

impl SkipFlag {
    /// Creates a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Returns true if it was lowered before.
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    /// Returns true if the flag is raised.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Runs tests.
pub trait Provider: Send {
    /// The test classes to run when nobody hands them out, in run order.
    fn suites(&self) -> Result<Vec<String>, ProviderError>;

    /// Runs every class `classes` yields, reporting to `listener`.
    ///
    /// Failing tests are reported, not returned; an error means the provider itself broke.
    fn invoke(
        &mut self,
        classes: &mut dyn Iterator<Item = String>,
        listener: &mut dyn RunListener,
    ) -> Result<(), ProviderError>;
}

/// Builds a provider.
pub type ProviderConstructor = fn(ProviderParameters) -> Result<Box<dyn Provider>, ProviderError>;

/// Providers known by name.
#[derive(Clone, Debug)]
pub struct ProviderRegistry {
    constructors: IndexMap<String, ProviderConstructor>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: IndexMap::new(),
        };
        registry.register(PojoProvider::NAME, PojoProvider::create);
        registry
    }
}

impl ProviderRegistry {
    /// Registers a provider, replacing any provider with the same name.
    pub fn register(&mut self, name: impl Into<String>, constructor: ProviderConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// The registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.constructors.keys().map(String::as_str)
    }

    /// Instantiates the provider `name`.
    pub fn create(
        &self,
        name: &str,
        params: ProviderParameters,
    ) -> Result<Box<dyn Provider>, ProviderError> {
        let constructor =
            self.constructors
                .get(name)
                .ok_or_else(|| ProviderError::UnknownProvider {
                    name: name.to_owned(),
                    known: self.names().map(str::to_owned).collect(),
                })?;
        constructor(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unknown_provider() {
        let config = BooterConfiguration::default();
        let params = ProviderParameters::from_config(&config, SkipFlag::new());
        let err = ProviderRegistry::default()
            .create("junit5", params)
            .err()
            .expect("unknown provider");
        assert_eq!(
            err.to_string(),
            "unknown provider `junit5` (known providers: pojo)"
        );
    }

    #[test]
    fn suite_classes_come_from_string_lists() {
        let mut config = BooterConfiguration::default();
        let params = ProviderParameters::from_config(&config, SkipFlag::new());
        assert_eq!(params.suite_classes(), None);

        config.test_suites = vec![
            ComponentDefinition::new("directory").with_param(TypedParam::StringList(vec![
                "org.x.ATest".to_owned(),
                String::new(),
            ])),
            ComponentDefinition::new("extra")
                .with_param(TypedParam::Boolean(true))
                .with_param(TypedParam::StringList(vec!["org.x.BTest".to_owned()])),
        ];
        let params = ProviderParameters::from_config(&config, SkipFlag::new());
        assert_eq!(
            params.suite_classes(),
            Some(vec!["org.x.ATest".to_owned(), "org.x.BTest".to_owned()])
        );
    }

    #[test]
    fn skip_flag_raises_once() {
        let flag = SkipFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_raised());
        assert!(flag.raise());
        assert!(!clone.raise());
        assert!(clone.is_raised());
    }
}
