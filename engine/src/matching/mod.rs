//! Pure text-matching predicates
//!
//! These predicates are consumed by the text asserters, by the default
//! expected-text check of the execution engine and by scripting memory
//! `fill()`. They carry no state; the active [`MatchingMode`] comes from the
//! capability set.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Match predicate selection
///
/// The `*_lowercase` variants compare case-insensitively by lowercasing both
/// sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMode {
    Regexp,
    RegexpLowercase,
    Wildcard,
    WildcardLowercase,
    WildcardExact,
    Include,
    IncludeLowercase,
    Equals,
}

/// Evaluate `pattern` against `response` under the given mode.
///
/// Returns an error only for an invalid regular expression pattern.
pub fn matches(mode: MatchingMode, response: &str, pattern: &str) -> Result<bool, regex::Error> {
    match mode {
        MatchingMode::Regexp => regexp_match(response, pattern),
        MatchingMode::RegexpLowercase => {
            regexp_match(&response.to_lowercase(), &pattern.to_lowercase())
        }
        MatchingMode::Wildcard => wildcard_match(response, pattern),
        MatchingMode::WildcardLowercase => {
            wildcard_match(&response.to_lowercase(), &pattern.to_lowercase())
        }
        MatchingMode::WildcardExact => wildcard_exact_match(response, pattern),
        MatchingMode::Include => Ok(include_match(response, pattern)),
        MatchingMode::IncludeLowercase => Ok(include_match(
            &response.to_lowercase(),
            &pattern.to_lowercase(),
        )),
        MatchingMode::Equals => Ok(equals_match(response, pattern)),
    }
}

/// Exact string equality
pub fn equals_match(response: &str, pattern: &str) -> bool {
    response == pattern
}

/// Substring containment
pub fn include_match(response: &str, pattern: &str) -> bool {
    response.contains(pattern)
}

/// Regular expression match, unanchored
pub fn regexp_match(response: &str, pattern: &str) -> Result<bool, regex::Error> {
    Ok(Regex::new(pattern)?.is_match(response))
}

/// Wildcard match: `*` spans any text, the pattern may match anywhere in the
/// response
pub fn wildcard_match(response: &str, pattern: &str) -> Result<bool, regex::Error> {
    Ok(Regex::new(&wildcard_to_regex(pattern))?.is_match(response))
}

/// Wildcard match anchored to the whole response
pub fn wildcard_exact_match(response: &str, pattern: &str) -> Result<bool, regex::Error> {
    let anchored = format!("^{}$", wildcard_to_regex(pattern));
    Ok(Regex::new(&anchored)?.is_match(response))
}

/// Translate a wildcard pattern into a regular expression: every literal is
/// escaped, every `*` becomes a greedy capture.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    for part in pattern.split('*') {
        if !out.is_empty() {
            out.push_str("(.*)");
        }
        out.push_str(&regex::escape(part));
    }
    // A pattern ending in '*' loses its trailing separator in split()
    if pattern.ends_with('*') {
        out.push_str("(.*)");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equals() {
        assert!(equals_match("hello", "hello"));
        assert!(!equals_match("hello", "Hello"));
        assert!(!equals_match("hello world", "hello"));
    }

    #[test]
    fn test_include() {
        assert!(include_match("hello world", "lo wor"));
        assert!(!include_match("hello world", "LO WOR"));
    }

    #[test]
    fn test_include_lowercase_via_mode() {
        assert!(matches(MatchingMode::IncludeLowercase, "Hello World", "LO WOR").unwrap());
    }

    #[test]
    fn test_regexp() {
        assert!(regexp_match("order 1234 shipped", r"order \d+").unwrap());
        assert!(!regexp_match("order shipped", r"order \d+").unwrap());
        assert!(regexp_match("ABC", "(?i)abc").unwrap());
    }

    #[test]
    fn test_regexp_invalid_pattern() {
        assert!(regexp_match("x", "(unclosed").is_err());
    }

    #[test]
    fn test_wildcard_spans_text() {
        assert!(wildcard_match("hello brave new world", "hello*world").unwrap());
        assert!(wildcard_match("say hello world now", "hello*world").unwrap());
        assert!(!wildcard_match("world hello", "hello*world").unwrap());
    }

    #[test]
    fn test_wildcard_escapes_literals() {
        assert!(wildcard_match("cost is 3.50", "cost is 3.50").unwrap());
        assert!(!wildcard_match("cost is 3x50", "cost is 3.50").unwrap());
    }

    #[test]
    fn test_wildcard_exact_is_anchored() {
        assert!(wildcard_exact_match("hello world", "hello*").unwrap());
        assert!(!wildcard_exact_match("say hello world", "hello*").unwrap());
        assert!(wildcard_exact_match("say hello world", "*hello*").unwrap());
    }

    #[test]
    fn test_wildcard_lowercase_via_mode() {
        assert!(matches(MatchingMode::WildcardLowercase, "Hello World", "hello*").unwrap());
        assert!(!matches(MatchingMode::Wildcard, "Hello World", "hello*").unwrap());
    }

    #[test]
    fn test_mode_serde_names() {
        let mode: MatchingMode = serde_json::from_str("\"wildcard_lowercase\"").unwrap();
        assert_eq!(mode, MatchingMode::WildcardLowercase);
        let mode: MatchingMode = serde_json::from_str("\"equals\"").unwrap();
        assert_eq!(mode, MatchingMode::Equals);
    }
}
