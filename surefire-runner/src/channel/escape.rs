// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! Escaping for record payloads.
//!
//! A record is one line of comma-separated fields. Inside a field, `\`, `,`, `\n` and `\r` are
//! escaped with a backslash, and a missing value is written as `\N`.

const NULL_MARKER: &str = "\\N";

/// Escapes a single field.
pub(crate) fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Escapes an optional field, writing the null marker for `None`.
pub(crate) fn escape_opt(input: Option<&str>) -> String {
    input.map_or_else(|| NULL_MARKER.to_owned(), escape)
}

/// Splits a payload into unescaped fields.
pub(crate) fn split_fields(payload: &str) -> Vec<Option<String>> {
    let mut fields = Vec::new();
    let mut raw_start = 0;
    let mut escaped = false;
    for (index, c) in payload.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ',' => {
                fields.push(unescape_field(&payload[raw_start..index]));
                raw_start = index + 1;
            }
            _ => {}
        }
    }
    fields.push(unescape_field(&payload[raw_start..]));
    fields
}

/// Unescapes a single field.
pub(crate) fn unescape_field(raw: &str) -> Option<String> {
    if raw == NULL_MARKER {
        return None;
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            // A dangling backslash is kept as is.
            None => out.push('\\'),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prop_assert_eq;
    use test_strategy::proptest;

    #[test]
    fn splits_escaped_commas() {
        let payload = [
            escape("org.x.A"),
            escape_opt(None),
            escape("a,b\nc\\"),
            escape(""),
        ]
        .join(",");
        assert_eq!(payload, r"org.x.A,\N,a\,b\nc\\,");
        assert_eq!(
            split_fields(&payload),
            vec![
                Some("org.x.A".to_owned()),
                None,
                Some("a,b\nc\\".to_owned()),
                Some(String::new()),
            ]
        );
    }

    #[test]
    fn escaped_text_never_contains_line_breaks() {
        let escaped = escape("line one\r\nline two");
        assert!(!escaped.contains(['\n', '\r']), "escaped: {escaped}");
    }

    #[proptest]
    fn fields_round_trip(fields: Vec<Option<String>>) {
        // An empty record can't be told apart from a single empty field.
        proptest::prop_assume!(!fields.is_empty());
        let payload = fields
            .iter()
            .map(|field| escape_opt(field.as_deref()))
            .collect::<Vec<_>>()
            .join(",");
        prop_assert_eq!(split_fields(&payload), fields);
    }
}
