// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! A reader and writer for Java-style `.properties` documents.
//!
//! The booter configuration is exchanged with forked processes in this format. Keys keep their
//! insertion order so that written files are stable and easy to diff.

use crate::errors::{BooterConfigError, PropertiesParseError};
use indexmap::IndexMap;
use std::{fmt::Write as _, io};

/// An ordered set of string properties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    entries: IndexMap<String, String>,
}

impl Properties {
    /// Creates an empty set of properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, returning the previous value if there was one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    /// Returns the value of a property.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Removes a property, preserving the order of the remaining ones.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Reads a boolean property. Only `true` (in any case) is true; a missing key is false.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }

    /// Writes a boolean property.
    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, if value { "true" } else { "false" });
    }

    /// Reads an integer property, if present.
    pub fn get_int<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, BooterConfigError>
    where
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|err: T::Err| BooterConfigError::InvalidValue {
                        key: key.to_owned(),
                        value: value.to_owned(),
                        reason: err.to_string(),
                    })
            })
            .transpose()
    }

    /// Reads a required string property.
    pub fn require(&self, key: &str) -> Result<&str, BooterConfigError> {
        self.get(key).ok_or_else(|| BooterConfigError::MissingKey {
            key: key.to_owned(),
        })
    }

    /// Writes `items` under the keys `<prefix>0`, `<prefix>1`, ...
    pub fn set_list<I, S>(&mut self, prefix: &str, items: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for (index, item) in items.into_iter().enumerate() {
            self.set(format!("{prefix}{index}"), item);
        }
    }

    /// Reads the values under `<prefix>0`, `<prefix>1`, ... up to the first missing index.
    pub fn get_list(&self, prefix: &str) -> Vec<String> {
        (0..)
            .map_while(|index| self.get(&format!("{prefix}{index}")).map(str::to_owned))
            .collect()
    }

    /// Parses a properties document.
    pub fn parse(input: &str) -> Result<Self, PropertiesParseError> {
        let mut entries = IndexMap::new();
        for line in LogicalLines::new(input) {
            let (key, value) = split_key_value(&line.text);
            let key =
                unescape(key).map_err(|message| PropertiesParseError::new(line.number, message))?;
            let value =
                unescape(value).map_err(|message| PropertiesParseError::new(line.number, message))?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }

    /// Serializes the properties as a document, preceded by a comment line.
    pub fn to_document(&self, comment: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(comment) = comment {
            for line in comment.lines() {
                _ = writeln!(out, "#{line}");
            }
        }
        for (key, value) in &self.entries {
            escape_into(&mut out, key, true);
            out.push('=');
            escape_into(&mut out, value, false);
            out.push('\n');
        }
        out
    }

    /// Writes the document to `writer`.
    pub fn write_to(&self, mut writer: impl io::Write, comment: Option<&str>) -> io::Result<()> {
        writer.write_all(self.to_document(comment).as_bytes())?;
        writer.flush()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Properties {
    type Item = (&'a String, &'a String);
    type IntoIter = indexmap::map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

struct LogicalLine {
    number: usize,
    text: String,
}

/// Joins natural lines into logical lines, dropping comments and blank lines.
struct LogicalLines<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> LogicalLines<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lines: input.lines().enumerate(),
        }
    }
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

impl Iterator for LogicalLines<'_> {
    type Item = LogicalLine;

    fn next(&mut self) -> Option<LogicalLine> {
        loop {
            let (index, raw) = self.lines.next()?;
            let line = raw.trim_end_matches('\r').trim_start_matches(is_blank);
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let mut text = String::new();
            let mut current = line;
            while ends_with_continuation(current) {
                text.push_str(&current[..current.len() - 1]);
                match self.lines.next() {
                    Some((_, next)) => {
                        current = next.trim_end_matches('\r').trim_start_matches(is_blank);
                    }
                    None => {
                        current = "";
                        break;
                    }
                }
            }
            text.push_str(current);
            return Some(LogicalLine {
                number: index + 1,
                text,
            });
        }
    }
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    let mut separator_seen = false;
    for (index, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = index;
                separator_seen = true;
                break;
            }
            c if is_blank(c) => {
                key_end = index;
                break;
            }
            _ => {}
        }
    }

    let key = &line[..key_end];
    let mut rest = &line[key_end..];
    if separator_seen {
        rest = &rest[1..];
    } else {
        rest = rest.trim_start_matches(is_blank);
        if let Some(stripped) = rest.strip_prefix(['=', ':']) {
            rest = stripped;
        }
    }
    (key, rest.trim_start_matches(is_blank))
}

fn unescape(input: &str) -> Result<String, String> {
    let mut units: Vec<u16> = Vec::with_capacity(input.len());
    let mut chars = input.chars();
    let mut buf = [0u16; 2];
    while let Some(c) = chars.next() {
        let c = if c == '\\' {
            match chars.next() {
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    if hex.len() != 4 {
                        return Err(format!("malformed \\uxxxx encoding: `\\u{hex}`"));
                    }
                    let unit = u16::from_str_radix(&hex, 16)
                        .map_err(|_| format!("malformed \\uxxxx encoding: `\\u{hex}`"))?;
                    units.push(unit);
                    continue;
                }
                Some('t') => '\t',
                Some('n') => '\n',
                Some('r') => '\r',
                Some('f') => '\x0c',
                Some(other) => other,
                None => break,
            }
        } else {
            c
        };
        units.extend_from_slice(c.encode_utf16(&mut buf));
    }
    String::from_utf16(&units).map_err(|_| "unpaired surrogate in \\u escape".to_owned())
}

fn escape_into(out: &mut String, input: &str, is_key: bool) {
    for (index, c) in input.chars().enumerate() {
        match c {
            ' ' if is_key || index == 0 => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            c if c < ' ' || c > '~' => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    _ = write!(out, "\\u{unit:04X}");
                }
            }
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_strategy::proptest;

    #[test]
    fn parse_java_document() {
        let input = indoc! {r"
            # a comment
            ! another comment
            classPathUrl.0=/tmp/a.jar
            key\ with\ spaces = value
            colon:separated
            whitespace   separated
            multi=first \
                  second
            unicode=caf\u00e9
            empty=
            escaped\=key=v\:1
        "};
        let props = Properties::parse(input).expect("parse succeeds");
        let entries: Vec<_> = props.iter().collect();
        assert_eq!(
            entries,
            vec![
                ("classPathUrl.0", "/tmp/a.jar"),
                ("key with spaces", "value"),
                ("colon", "separated"),
                ("whitespace", "separated"),
                ("multi", "first second"),
                ("unicode", "café"),
                ("empty", ""),
                ("escaped=key", "v:1"),
            ]
        );
    }

    #[test]
    fn malformed_unicode_escape() {
        let err = Properties::parse("a=ok\nb=\\u12\n").expect_err("parse fails");
        assert_eq!(err.to_string(), "line 2: malformed \\uxxxx encoding: `\\u12`");
    }

    #[test]
    fn writes_escapes() {
        let props: Properties = [("a b", " lead"), ("#c", "x=y\nz"), ("d", "é")]
            .into_iter()
            .collect();
        assert_eq!(
            props.to_document(Some("surefire")),
            indoc! {r"
                #surefire
                a\ b=\ lead
                \#c=x\=y\nz
                d=\u00E9
            "}
        );
    }

    #[test]
    fn list_helpers() {
        let mut props = Properties::new();
        props.set_list("classPathUrl.", ["a.jar", "b.jar"]);
        props.set("classPathUrl.3", "orphan.jar");
        assert_eq!(props.get_list("classPathUrl."), vec!["a.jar", "b.jar"]);
        assert!(props.get_list("missing.").is_empty());
    }

    #[test]
    fn typed_getters() {
        let props: Properties = [("yes", "TRUE"), ("no", "nope"), ("n", "42"), ("bad", "x")]
            .into_iter()
            .collect();
        assert!(props.get_bool("yes"));
        assert!(!props.get_bool("no"));
        assert!(!props.get_bool("missing"));
        assert_eq!(props.get_int::<u32>("n").expect("valid"), Some(42));
        assert_eq!(props.get_int::<u32>("missing").expect("valid"), None);
        assert!(props.get_int::<u32>("bad").is_err());
    }

    #[proptest]
    fn document_round_trip(entries: Vec<(String, String)>) {
        let props: Properties = entries.into_iter().collect();
        let parsed = Properties::parse(&props.to_document(Some("round trip")))
            .expect("written documents parse");
        proptest::prop_assert_eq!(parsed, props);
    }
}
