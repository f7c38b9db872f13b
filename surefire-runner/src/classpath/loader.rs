// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

use super::Classpath;
use crate::errors::ClassLoadError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, sync::Arc};
use tracing::trace;

/// What a loader is used for. Reported in lookup errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderRole {
    /// The shared system loader.
    System,

    /// The loader tests are resolved through.
    Test,

    /// The loader providers are resolved through.
    Provider,
}

impl fmt::Display for LoaderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Test => f.write_str("test"),
            Self::Provider => f.write_str("provider"),
        }
    }
}

/// A class that was found by a loader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedClass {
    /// The dotted class name.
    pub name: String,

    /// The filesystem entry backing the class.
    pub location: Utf8PathBuf,

    /// The role of the loader that defined the class.
    pub defined_by: LoaderRole,

    /// Whether assertions are enabled for this class.
    pub assertions_enabled: bool,
}

/// Resolves dotted class names to filesystem entries.
pub trait ClassLoader: fmt::Debug + Send + Sync {
    /// The role of this loader.
    fn role(&self) -> LoaderRole;

    /// The parent loader, if any.
    fn parent(&self) -> Option<&dyn ClassLoader>;

    /// Looks the class up in this loader's own classpath only.
    fn find_own(&self, class_name: &str) -> Option<ResolvedClass>;

    /// Whether this loader asks itself before its parent.
    fn child_first(&self) -> bool;

    /// Resolves a class following the delegation order of this loader.
    fn load_class(&self, class_name: &str) -> Result<ResolvedClass, ClassLoadError> {
        validate_class_name(class_name)?;

        let from_parent = || {
            self.parent()
                .and_then(|parent| parent.load_class(class_name).ok())
        };
        let found = if self.child_first() {
            self.find_own(class_name).or_else(from_parent)
        } else {
            from_parent().or_else(|| self.find_own(class_name))
        };

        found.ok_or_else(|| ClassLoadError::NotFound {
            class_name: class_name.to_owned(),
            role: self.role().to_string(),
        })
    }
}

fn validate_class_name(class_name: &str) -> Result<(), ClassLoadError> {
    let valid = !class_name.is_empty()
        && class_name.split('.').all(|segment| {
            !segment.is_empty()
                && segment != ".."
                && !segment.contains(['/', '\\'])
        });
    if valid {
        Ok(())
    } else {
        Err(ClassLoadError::InvalidName {
            class_name: class_name.to_owned(),
        })
    }
}

/// A loader over its own classpath, with an optional parent.
///
/// With child delegation enabled, the loader searches its own classpath first and only then asks
/// its parent. Otherwise it uses the standard parent-first order.
#[derive(Clone, Debug)]
pub struct IsolatedClassLoader {
    role: LoaderRole,
    classpath: Classpath,
    parent: Option<Arc<dyn ClassLoader>>,
    child_delegation: bool,
    enable_assertions: bool,
}

impl IsolatedClassLoader {
    /// Creates a new loader.
    pub fn new(
        role: LoaderRole,
        classpath: Classpath,
        parent: Option<Arc<dyn ClassLoader>>,
        child_delegation: bool,
        enable_assertions: bool,
    ) -> Self {
        Self {
            role,
            classpath,
            parent,
            child_delegation,
            enable_assertions,
        }
    }

    /// The loader's own classpath.
    pub fn classpath(&self) -> &Classpath {
        &self.classpath
    }
}

impl ClassLoader for IsolatedClassLoader {
    fn role(&self) -> LoaderRole {
        self.role
    }

    fn parent(&self) -> Option<&dyn ClassLoader> {
        self.parent.as_deref()
    }

    fn child_first(&self) -> bool {
        self.child_delegation
    }

    fn find_own(&self, class_name: &str) -> Option<ResolvedClass> {
        let relative: Utf8PathBuf = class_name.split('.').collect();
        self.classpath.elements().find_map(|element| {
            let location = Utf8Path::new(element).join(&relative);
            location.exists().then(|| {
                trace!(class_name, %location, role = %self.role, "resolved class");
                ResolvedClass {
                    name: class_name.to_owned(),
                    location,
                    defined_by: self.role,
                    assertions_enabled: self.enable_assertions,
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::ClasspathConfiguration;
    use camino_tempfile::Utf8TempDir;
    use std::fs;
    use test_case::test_case;

    fn touch(root: &Utf8Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("has parent")).expect("created dirs");
        fs::write(path, "").expect("wrote file");
    }

    struct Fixture {
        _dir: Utf8TempDir,
        boot: Utf8PathBuf,
        tests: Utf8PathBuf,
        provider: Utf8PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let boot = dir.path().join("boot");
        let tests = dir.path().join("tests");
        let provider = dir.path().join("provider");
        touch(&boot, "org/shared/Util");
        touch(&tests, "org/shared/Util");
        touch(&tests, "org/x/ATest");
        touch(&provider, "org/p/Runner");
        Fixture {
            _dir: dir,
            boot,
            tests,
            provider,
        }
    }

    fn config(fixture: &Fixture, child_delegation: bool) -> ClasspathConfiguration {
        ClasspathConfiguration {
            test_classpath: Classpath::new([fixture.tests.as_str()]),
            provider_classpath: Classpath::new([fixture.provider.as_str()]),
            boot_classpath: Classpath::new([fixture.boot.as_str()]),
            child_delegation,
            ..Default::default()
        }
    }

    #[test_case(true, LoaderRole::Test; "child first")]
    #[test_case(false, LoaderRole::System; "parent first")]
    fn delegation_order(child_delegation: bool, expected: LoaderRole) {
        let fixture = fixture();
        let config = config(&fixture, child_delegation);
        let system = config.system_loader();
        let loader = config.test_loader(&system);

        let shared = loader.load_class("org.shared.Util").expect("found");
        assert_eq!(shared.defined_by, expected);

        let own = loader.load_class("org.x.ATest").expect("found");
        assert_eq!(own.defined_by, LoaderRole::Test);
        assert_eq!(own.location, fixture.tests.join("org/x/ATest"));
    }

    #[test]
    fn tests_and_providers_are_isolated() {
        let fixture = fixture();
        let config = config(&fixture, true);
        let system = config.system_loader();
        let tests = config.test_loader(&system);
        let provider = config.provider_loader(&system);

        assert!(matches!(
            tests.load_class("org.p.Runner"),
            Err(ClassLoadError::NotFound { .. })
        ));
        assert!(matches!(
            provider.load_class("org.x.ATest"),
            Err(ClassLoadError::NotFound { .. })
        ));
        assert!(provider.load_class("org.shared.Util").is_ok());
    }

    #[test]
    fn merged_system_loader() {
        let fixture = fixture();
        let mut config = config(&fixture, false);
        config.use_system_class_loader = true;
        let system = config.system_loader();
        let loader = config.test_loader(&system);
        let found = loader.load_class("org.x.ATest").expect("found");
        assert_eq!(found.defined_by, LoaderRole::System);
    }

    #[test_case(""; "empty")]
    #[test_case("org..A"; "empty segment")]
    #[test_case("org/x/A"; "slashes")]
    fn invalid_names(name: &str) {
        let fixture = fixture();
        let config = config(&fixture, false);
        let system = config.system_loader();
        assert!(matches!(
            system.load_class(name),
            Err(ClassLoadError::InvalidName { .. })
        ));
    }
}
