// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed parameters for reporter and test suite definitions.
//!
//! A definition is stored as three sibling keys:
//!
//! * `<key>` holds the component name.
//! * `<key>.types` holds a JSON array of type tags.
//! * `<key>.params` holds a JSON array of values, one per tag.
//!
//! Values are encoded with JSON rather than delimiter-joined text, so any string survives the
//! round trip.

use super::Properties;
use crate::errors::BooterConfigError;
use camino::Utf8PathBuf;
use serde_json::{Value, json};
use std::fmt;

/// The type of a [`TypedParam`], as written to the `.types` key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeTag {
    /// A string.
    String,

    /// A single file path.
    File,

    /// A list of file paths.
    FileArray,

    /// A list of strings.
    StringList,

    /// A boolean.
    Boolean,

    /// A signed integer.
    Integer,

    /// A nested properties document.
    Properties,
}

impl TypeTag {
    /// All known tags.
    pub const ALL: &'static [Self] = &[
        Self::String,
        Self::File,
        Self::FileArray,
        Self::StringList,
        Self::Boolean,
        Self::Integer,
        Self::Properties,
    ];

    /// Returns the tag as written to the properties file.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::File => "file",
            Self::FileArray => "file-array",
            Self::StringList => "string-list",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Properties => "properties",
        }
    }

    /// Looks up a tag by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.as_str() == name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A constructor parameter that crosses the process boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypedParam {
    /// A string.
    String(String),

    /// A single file path.
    File(Utf8PathBuf),

    /// A list of file paths.
    FileArray(Vec<Utf8PathBuf>),

    /// A list of strings.
    StringList(Vec<String>),

    /// A boolean.
    Boolean(bool),

    /// A signed integer.
    Integer(i64),

    /// A nested properties document.
    Properties(Properties),
}

impl TypedParam {
    /// Returns the type tag for this parameter.
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::String(_) => TypeTag::String,
            Self::File(_) => TypeTag::File,
            Self::FileArray(_) => TypeTag::FileArray,
            Self::StringList(_) => TypeTag::StringList,
            Self::Boolean(_) => TypeTag::Boolean,
            Self::Integer(_) => TypeTag::Integer,
            Self::Properties(_) => TypeTag::Properties,
        }
    }

    /// Returns the value if this is a string parameter.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value if this is a boolean parameter.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value if this is a file parameter.
    pub fn as_file(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::File(path) => Some(path),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::String(s) => json!(s),
            Self::File(path) => json!(path),
            Self::FileArray(paths) => json!(paths),
            Self::StringList(items) => json!(items),
            Self::Boolean(b) => json!(b),
            Self::Integer(n) => json!(n),
            Self::Properties(props) => json!(props.to_document(None)),
        }
    }

    fn from_json(key: &str, tag: TypeTag, value: Value) -> Result<Self, BooterConfigError> {
        let invalid = |err| BooterConfigError::InvalidParam {
            key: key.to_owned(),
            expected: tag,
            err,
        };
        let param = match tag {
            TypeTag::String => Self::String(serde_json::from_value(value).map_err(invalid)?),
            TypeTag::File => Self::File(serde_json::from_value(value).map_err(invalid)?),
            TypeTag::FileArray => Self::FileArray(serde_json::from_value(value).map_err(invalid)?),
            TypeTag::StringList => {
                Self::StringList(serde_json::from_value(value).map_err(invalid)?)
            }
            TypeTag::Boolean => Self::Boolean(serde_json::from_value(value).map_err(invalid)?),
            TypeTag::Integer => Self::Integer(serde_json::from_value(value).map_err(invalid)?),
            TypeTag::Properties => {
                let document: String = serde_json::from_value(value).map_err(invalid)?;
                Self::Properties(Properties::parse(&document)?)
            }
        };
        Ok(param)
    }
}

/// A named component (reporter or test suite) together with its constructor parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentDefinition {
    /// The name the component is registered under.
    pub name: String,

    /// The constructor parameters, in order.
    pub params: Vec<TypedParam>,
}

impl ComponentDefinition {
    /// Creates a definition without parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Adds a parameter.
    pub fn with_param(mut self, param: TypedParam) -> Self {
        self.params.push(param);
        self
    }

    /// Writes this definition under `key`.
    pub fn write(&self, props: &mut Properties, key: &str) {
        props.set(key, self.name.as_str());
        if self.params.is_empty() {
            return;
        }
        let tags: Vec<_> = self.params.iter().map(|p| p.tag().as_str()).collect();
        let values: Vec<_> = self.params.iter().map(TypedParam::to_json).collect();
        props.set(format!("{key}.types"), json!(tags).to_string());
        props.set(format!("{key}.params"), Value::Array(values).to_string());
    }

    /// Reads the definition stored under `key`, if any.
    pub fn read(props: &Properties, key: &str) -> Result<Option<Self>, BooterConfigError> {
        let Some(name) = props.get(key) else {
            return Ok(None);
        };

        let types_key = format!("{key}.types");
        let params_key = format!("{key}.params");
        let tags: Vec<String> = match props.get(&types_key) {
            Some(raw) => parse_array(&types_key, raw)?,
            None => Vec::new(),
        };
        let values: Vec<Value> = match props.get(&params_key) {
            Some(raw) => parse_array(&params_key, raw)?,
            None => Vec::new(),
        };
        if tags.len() != values.len() {
            return Err(BooterConfigError::ParamCountMismatch {
                key: key.to_owned(),
                types: tags.len(),
                params: values.len(),
            });
        }

        let params = tags
            .into_iter()
            .zip(values)
            .map(|(tag, value)| {
                let tag = TypeTag::from_name(&tag).ok_or_else(|| {
                    BooterConfigError::UnknownParamType {
                        key: key.to_owned(),
                        tag: tag.clone(),
                    }
                })?;
                TypedParam::from_json(key, tag, value)
            })
            .collect::<Result<_, _>>()?;

        Ok(Some(Self {
            name: name.to_owned(),
            params,
        }))
    }

    /// Writes `definitions` under `<prefix>0`, `<prefix>1`, ...
    pub fn write_all(props: &mut Properties, prefix: &str, definitions: &[Self]) {
        for (index, definition) in definitions.iter().enumerate() {
            definition.write(props, &format!("{prefix}{index}"));
        }
    }

    /// Reads definitions stored under `<prefix>0`, `<prefix>1`, ... up to the first missing one.
    pub fn read_all(props: &Properties, prefix: &str) -> Result<Vec<Self>, BooterConfigError> {
        let mut definitions = Vec::new();
        for index in 0.. {
            match Self::read(props, &format!("{prefix}{index}"))? {
                Some(definition) => definitions.push(definition),
                None => break,
            }
        }
        Ok(definitions)
    }
}

fn parse_array<T: serde::de::DeserializeOwned>(
    key: &str,
    raw: &str,
) -> Result<Vec<T>, BooterConfigError> {
    serde_json::from_str(raw).map_err(|err| BooterConfigError::InvalidValue {
        key: key.to_owned(),
        value: raw.to_owned(),
        reason: err.to_string(),
    })
}
