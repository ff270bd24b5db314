//! Configuration (capability) management
//!
//! This module handles loading and defaulting of the capability set that
//! drives compilation and execution. Capabilities are stored in TOML format
//! and can also be built in code; every section has serde defaults so an
//! empty file is a valid configuration.
//!
//! # Configuration Sections
//!
//! - **scripting**: scripting memory enablement, matching mode, fill mode
//! - **security**: opt-in for unsafe scripting functions
//! - **assertion**: multi-error aggregation
//! - **retry_user_says / retry_asserter**: the two retry namespaces
//! - **rate_limit**: minimum interval and concurrency cap for connector calls
//! - **extras**: free-form capability values resolved by `$cap(NAME)`
//!
//! # Examples
//!
//! ```no_run
//! use convocheck_engine::config::Caps;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let caps = Caps::load("convocheck.toml")?;
//! println!("wait timeout: {}ms", caps.wait_for_bot_timeout_ms);
//! # Ok(())
//! # }
//! ```

use crate::matching::MatchingMode;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Capture group style used by scripting memory `fill()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// `$name` captures a single word (`\w+`)
    Word,
    /// `$name` captures any non-space run (`\S+`)
    NonSpace,
    /// `$name` captures greedily (`.*`)
    Joker,
}

impl Default for FillMode {
    fn default() -> Self {
        FillMode::Word
    }
}

/// Main capability structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caps {
    /// Project name, resolved by `$projectname`
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Test session name, resolved by `$testsessionname`
    #[serde(default = "default_test_session_name")]
    pub test_session_name: String,

    /// Wait window for bot replies, in milliseconds
    #[serde(default = "default_wait_for_bot_timeout_ms")]
    pub wait_for_bot_timeout_ms: u64,

    /// Scripting memory settings
    #[serde(default)]
    pub scripting: ScriptingCaps,

    /// Security settings
    #[serde(default)]
    pub security: SecurityCaps,

    /// Assertion evaluation settings
    #[serde(default)]
    pub assertion: AssertionCaps,

    /// Retry settings for connector calls
    #[serde(default)]
    pub retry_user_says: RetryCaps,

    /// Retry settings for asserter evaluation
    #[serde(default)]
    pub retry_asserter: RetryCaps,

    /// Rate limiting for connector calls
    #[serde(default)]
    pub rate_limit: RateLimitCaps,

    /// Free-form capability values, resolved by `$cap(NAME)`
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            test_session_name: default_test_session_name(),
            wait_for_bot_timeout_ms: default_wait_for_bot_timeout_ms(),
            scripting: ScriptingCaps::default(),
            security: SecurityCaps::default(),
            assertion: AssertionCaps::default(),
            retry_user_says: RetryCaps::default(),
            retry_asserter: RetryCaps::default(),
            rate_limit: RateLimitCaps::default(),
            extras: BTreeMap::new(),
        }
    }
}

/// Scripting memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptingCaps {
    /// Enable variable capture and seeded-memory convo expansion
    #[serde(default)]
    pub enable_memory: bool,

    /// Match predicate for expected bot text
    #[serde(default = "default_matching_mode")]
    pub matching_mode: MatchingMode,

    /// Capture group style for `fill()`
    #[serde(default)]
    pub fill_mode: FillMode,
}

impl Default for ScriptingCaps {
    fn default() -> Self {
        Self {
            enable_memory: false,
            matching_mode: default_matching_mode(),
            fill_mode: FillMode::default(),
        }
    }
}

/// Security settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityCaps {
    /// Allow scripting functions with arbitrary environment access
    #[serde(default)]
    pub allow_unsafe: bool,
}

/// Assertion evaluation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssertionCaps {
    /// Evaluate all asserters of a failing step and aggregate the causes
    /// into one composite error
    #[serde(default)]
    pub aggregate_errors: bool,
}

/// One retry namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryCaps {
    /// Number of retries after the first failed attempt
    #[serde(default = "default_num_retries")]
    pub num_retries: usize,

    /// Minimum wait between attempts, in milliseconds
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,

    /// Substring patterns: a matching error message is retryable
    #[serde(default)]
    pub error_patterns: Vec<String>,

    /// Regular expression patterns: a matching error message is retryable
    #[serde(default)]
    pub error_patterns_regexp: Vec<String>,

    /// Back-compatibility switch: with no patterns configured, retry any
    /// error
    #[serde(default)]
    pub retry_always: bool,
}

impl Default for RetryCaps {
    fn default() -> Self {
        Self {
            num_retries: default_num_retries(),
            min_timeout_ms: default_min_timeout_ms(),
            error_patterns: Vec::new(),
            error_patterns_regexp: Vec::new(),
            retry_always: false,
        }
    }
}

/// Rate limiting for connector calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitCaps {
    /// Minimum elapsed time between successive dispatch starts, in
    /// milliseconds; absent means unconstrained
    #[serde(default)]
    pub min_time_ms: Option<u64>,

    /// Maximum number of concurrently in-flight dispatches; absent means
    /// unconstrained
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

fn default_project_name() -> String {
    "convocheck".to_string()
}

fn default_test_session_name() -> String {
    "local".to_string()
}

fn default_wait_for_bot_timeout_ms() -> u64 {
    10_000
}

fn default_matching_mode() -> MatchingMode {
    MatchingMode::WildcardLowercase
}

fn default_num_retries() -> usize {
    1
}

fn default_min_timeout_ms() -> u64 {
    1_000
}

impl Caps {
    /// Load capabilities from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = fs::read_to_string(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("invalid capability file: {}", e)))
    }

    /// Capability value for `$cap(NAME)`
    pub fn extra(&self, name: &str) -> Option<&str> {
        self.extras.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let caps = Caps::default();
        assert_eq!(caps.wait_for_bot_timeout_ms, 10_000);
        assert!(!caps.scripting.enable_memory);
        assert_eq!(caps.scripting.matching_mode, MatchingMode::WildcardLowercase);
        assert_eq!(caps.scripting.fill_mode, FillMode::Word);
        assert!(!caps.security.allow_unsafe);
        assert!(!caps.assertion.aggregate_errors);
        assert_eq!(caps.retry_user_says.num_retries, 1);
        assert!(caps.rate_limit.min_time_ms.is_none());
    }

    #[test]
    fn test_empty_toml_is_valid() {
        let caps: Caps = toml::from_str("").unwrap();
        assert_eq!(caps.project_name, "convocheck");
    }

    #[test]
    fn test_parse_sections() {
        let caps: Caps = toml::from_str(
            r#"
            wait_for_bot_timeout_ms = 5000

            [scripting]
            enable_memory = true
            matching_mode = "equals"
            fill_mode = "joker"

            [retry_user_says]
            num_retries = 3
            min_timeout_ms = 100
            error_patterns = ["ECONNRESET"]

            [rate_limit]
            min_time_ms = 10
            max_concurrent = 2

            [extras]
            MYCAP = "myvalue"
            "#,
        )
        .unwrap();

        assert_eq!(caps.wait_for_bot_timeout_ms, 5000);
        assert!(caps.scripting.enable_memory);
        assert_eq!(caps.scripting.matching_mode, MatchingMode::Equals);
        assert_eq!(caps.scripting.fill_mode, FillMode::Joker);
        assert_eq!(caps.retry_user_says.num_retries, 3);
        assert_eq!(caps.retry_user_says.error_patterns, vec!["ECONNRESET"]);
        assert_eq!(caps.rate_limit.min_time_ms, Some(10));
        assert_eq!(caps.rate_limit.max_concurrent, Some(2));
        assert_eq!(caps.extra("MYCAP"), Some("myvalue"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Caps::load("/nonexistent/convocheck.toml").unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
