// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! General support code for surefire-runner.

use std::time::Duration;

/// Utilities for pluralizing words based on a count.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }
}

/// Formats a duration the way the text reporters print elapsed times: seconds with three
/// decimals, e.g. `0.042`.
pub(crate) fn elapsed_secs(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

/// Formats a duration given in milliseconds, as carried by report entries.
pub(crate) fn elapsed_millis_secs(millis: u64) -> String {
    elapsed_secs(Duration::from_millis(millis))
}

/// Returns the simple name of a dotted class name.
pub(crate) fn simple_class_name(class_name: &str) -> &str {
    class_name
        .rsplit_once('.')
        .map_or(class_name, |(_, simple)| simple)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, "0.000"; "zero")]
    #[test_case(42, "0.042"; "millis")]
    #[test_case(61_500, "61.500"; "over a minute")]
    fn elapsed_formatting(millis: u64, expected: &str) {
        assert_eq!(elapsed_millis_secs(millis), expected);
    }

    #[test_case("org.x.ATest", "ATest"; "dotted")]
    #[test_case("ATest", "ATest"; "undotted")]
    fn simple_names(input: &str, expected: &str) {
        assert_eq!(simple_class_name(input), expected);
    }
}
