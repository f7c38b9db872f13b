// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Classpaths and the isolated loaders built from them.
//!
//! A [`Classpath`] is an ordered set of path-like elements. Tests and providers each get their
//! own [`IsolatedClassLoader`] so that neither can resolve the other's classes.

mod loader;

pub use loader::*;

use crate::booter::Properties;
use indexmap::IndexSet;
use std::{fmt, sync::Arc};

/// An ordered set of classpath elements.
///
/// Appending an element that is already present leaves the classpath unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classpath {
    elements: IndexSet<String>,
}

impl Classpath {
    /// Creates a classpath from `elements`, trimming each and dropping empty or repeated ones.
    pub fn new<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classpath = Self::default();
        for element in elements {
            classpath.push(element.as_ref());
        }
        classpath
    }

    /// Creates an empty classpath.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds an element in place, returning false if it was empty or already present.
    ///
    /// Only for use while the classpath is being built.
    pub fn push(&mut self, element: &str) -> bool {
        let element = element.trim();
        if element.is_empty() {
            return false;
        }
        self.elements.insert(element.to_owned())
    }

    /// Returns this classpath with `element` added at the end.
    pub fn add_element(mut self, element: &str) -> Self {
        self.push(element);
        self
    }

    /// Returns a new classpath holding this classpath's elements followed by `other`'s.
    pub fn append(&self, other: &Classpath) -> Classpath {
        Self::join(self, other)
    }

    /// Joins two classpaths, keeping the first occurrence of every element.
    pub fn join(first: &Classpath, second: &Classpath) -> Classpath {
        let mut joined = first.clone();
        for element in &second.elements {
            joined.push(element);
        }
        joined
    }

    /// Returns true if the element is part of this classpath.
    pub fn contains(&self, element: &str) -> bool {
        self.elements.contains(element.trim())
    }

    /// Iterates over the elements in order.
    pub fn elements(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.elements.iter().map(String::as_str)
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Joins the elements with the platform path separator, as used in `CLASSPATH`-style
    /// environment variables.
    pub fn to_path_string(&self) -> String {
        let separator = if cfg!(windows) { ";" } else { ":" };
        itertools::join(self.elements(), separator)
    }

    /// Writes the elements as `<prefix>0`, `<prefix>1`, ...
    pub fn write_to(&self, props: &mut Properties, prefix: &str) {
        props.set_list(prefix, self.elements());
    }

    /// Reads elements stored with [`Self::write_to`].
    pub fn read_from(props: &Properties, prefix: &str) -> Self {
        Self::new(props.get_list(prefix))
    }
}

impl fmt::Display for Classpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", itertools::join(self.elements(), ", "))
    }
}

impl<S: AsRef<str>> FromIterator<S> for Classpath {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// The classpaths a booter needs, plus the delegation settings for the loaders built from them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClasspathConfiguration {
    /// Classpath for the tests under test.
    pub test_classpath: Classpath,

    /// Classpath for the provider.
    pub provider_classpath: Classpath,

    /// Classpath shared by both, searched by the system loader.
    pub boot_classpath: Classpath,

    /// Whether loaders look in their own classpath before asking their parent.
    pub child_delegation: bool,

    /// Whether tests are resolved through a single loader merged with the boot classpath.
    pub use_system_class_loader: bool,

    /// Whether assertions are enabled for loaded tests.
    pub enable_assertions: bool,
}

impl ClasspathConfiguration {
    /// Builds the system loader over the boot classpath.
    pub fn system_loader(&self) -> Arc<IsolatedClassLoader> {
        Arc::new(IsolatedClassLoader::new(
            LoaderRole::System,
            self.boot_classpath.clone(),
            None,
            false,
            self.enable_assertions,
        ))
    }

    /// Builds the loader tests are resolved through.
    pub fn test_loader(&self, system: &Arc<IsolatedClassLoader>) -> Arc<IsolatedClassLoader> {
        if self.use_system_class_loader {
            Arc::new(IsolatedClassLoader::new(
                LoaderRole::System,
                self.boot_classpath.append(&self.test_classpath),
                None,
                false,
                self.enable_assertions,
            ))
        } else {
            Arc::new(IsolatedClassLoader::new(
                LoaderRole::Test,
                self.test_classpath.clone(),
                Some(system.clone() as Arc<dyn ClassLoader>),
                self.child_delegation,
                self.enable_assertions,
            ))
        }
    }

    /// Builds the loader providers are resolved through.
    pub fn provider_loader(&self, system: &Arc<IsolatedClassLoader>) -> Arc<IsolatedClassLoader> {
        Arc::new(IsolatedClassLoader::new(
            LoaderRole::Provider,
            self.provider_classpath.clone(),
            Some(system.clone() as Arc<dyn ClassLoader>),
            self.child_delegation,
            false,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_strategy::proptest;

    #[test]
    fn append_overlapping() {
        let first = Classpath::new(["a.jar", "b.jar"]);
        let second = Classpath::new(["b.jar", "c.jar"]);
        let joined = first.append(&second);
        assert_eq!(
            joined.elements().collect::<Vec<_>>(),
            vec!["a.jar", "b.jar", "c.jar"]
        );
        // The inputs are untouched.
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn trims_and_drops_empty() {
        let classpath = Classpath::new([" a.jar ", "", "   ", "a.jar", "b.jar"]);
        assert_eq!(classpath.elements().collect::<Vec<_>>(), vec!["a.jar", "b.jar"]);
        assert!(classpath.contains(" b.jar"));
    }

    #[test]
    fn add_existing_element_is_identity() {
        let classpath = Classpath::new(["a.jar", "b.jar"]);
        assert_eq!(classpath.clone().add_element("a.jar"), classpath);
    }

    #[test]
    fn properties_round_trip() {
        let classpath = Classpath::new(["/x/a.jar", "/x/classes"]);
        let mut props = Properties::new();
        classpath.write_to(&mut props, "classPathUrl.");
        assert_eq!(props.get("classPathUrl.1"), Some("/x/classes"));
        assert_eq!(Classpath::read_from(&props, "classPathUrl."), classpath);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(String),
        Append(Vec<String>),
    }

    fn op() -> impl Strategy<Value = Op> {
        let element = "[a-d]{1,2}(\\.jar)?";
        prop_oneof![
            element.prop_map(Op::Add),
            prop::collection::vec(element, 0..5).prop_map(Op::Append),
        ]
    }

    #[proptest]
    fn never_holds_duplicates(#[strategy(prop::collection::vec(op(), 0..20))] ops: Vec<Op>) {
        let mut classpath = Classpath::empty();
        for op in ops {
            classpath = match op {
                Op::Add(element) => classpath.add_element(&element),
                Op::Append(elements) => classpath.append(&Classpath::new(elements)),
            };
        }
        let elements: Vec<_> = classpath.elements().collect();
        let unique: std::collections::HashSet<_> = elements.iter().collect();
        prop_assert_eq!(elements.len(), unique.len());
        prop_assert_eq!(elements.len(), classpath.len());
    }
}
