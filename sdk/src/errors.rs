//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Convocheck
//! engine. All errors implement the `ConvocheckErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are retryable by the
//! retry policy.
//!
//! Every error raised during a convo run carries the originating step tag
//! (source locator) in its message, and [`RunError`] pairs the error with the
//! partial [`Transcript`] so a caller can report exactly which step failed
//! and what was expected versus actual.

use crate::types::Transcript;
use serde::Serialize;
use std::fmt;

/// Fixed marker substring present in every timeout error message.
///
/// Callers match on this to distinguish a missing bot reply from other
/// failures.
pub const TIMEOUT_MARKER: &str = "bot did not respond within";

/// Structured cause of a single assertion failure
///
/// Callers rely on this shape, not just the message string: `source` names
/// the asserter, `not` records negation mode, `expected`/`actual` carry the
/// compared values.
#[derive(Debug, Clone, Serialize)]
pub struct AssertionFailure {
    /// Name of the asserter that produced the failure
    pub source: String,

    /// Source locator of the failing step
    pub step_tag: String,

    /// Whether the assertion ran in negation mode
    pub not: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,

    /// Human-readable failure description (without the step tag prefix)
    pub message: String,
}

impl AssertionFailure {
    /// Create a failure cause with the mandatory fields
    pub fn new(
        source: impl Into<String>,
        step_tag: impl Into<String>,
        not: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            step_tag: step_tag.into(),
            not,
            expected: None,
            actual: None,
            diff: None,
            message: message.into(),
        }
    }

    /// Attach the expected value
    pub fn with_expected(mut self, expected: serde_json::Value) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Attach the actual value
    pub fn with_actual(mut self, actual: serde_json::Value) -> Self {
        self.actual = Some(actual);
        self
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step_tag, self.message)
    }
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Compile**: malformed script, duplicate/missing/circular partial convo,
///   illegal name. Always fatal, never retried.
/// - **Configuration**: wrong asserter/hook argument count or type. Fatal for
///   that step, not retried.
/// - **Assertion / Composite**: assertion failures, retried per asserter
///   retry policy if configured.
/// - **Connector**: rejection from the external bot connector, retried per
///   connector retry policy if its message matches configured patterns.
/// - **Timeout**: no bot reply within the wait window, recognizable by
///   [`TIMEOUT_MARKER`].
/// - **Security**: unsafe scripting-memory function invoked without explicit
///   opt-in. Never retried.
// Display/Error/From are implemented by hand because the `Configuration`
// variant has a field named `source` that is not itself an error, which the
// thiserror derive would treat as the error source.
#[derive(Debug)]
pub enum EngineError {
    // Configuration file errors
    Config(String),

    // Compile-time errors
    Compile(String),

    // Plugin argument errors
    Configuration {
        step_tag: String,
        source: String,
        message: String,
    },

    // Single assertion failure
    Assertion(AssertionFailure),

    // Aggregated assertion failures (multi-error mode)
    Composite {
        message: String,
        errors: Vec<AssertionFailure>,
    },

    // Connector rejection
    Connector(String),

    // Missing bot reply
    Timeout { step_tag: String, timeout_ms: u64 },

    // Unsafe scripting function without opt-in
    Security(String),

    // Unread bot replies at convo end
    QueueNotEmpty { step_tag: String, count: usize },

    // Mandatory condition group with no met condition
    ConditionGroupUnmet {
        step_tag: String,
        group_id: String,
    },

    // Generic IO error
    Io(std::io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Compile(msg) => write!(f, "Compile error: {msg}"),
            Self::Configuration {
                step_tag,
                source,
                message,
            } => write!(f, "{step_tag}: invalid arguments for {source}: {message}"),
            Self::Assertion(cause) => write!(f, "{cause}"),
            Self::Composite { message, .. } => write!(f, "{message}"),
            Self::Connector(msg) => write!(f, "Connector error: {msg}"),
            Self::Timeout {
                step_tag,
                timeout_ms,
            } => write!(f, "{step_tag}: bot did not respond within {timeout_ms}ms"),
            Self::Security(msg) => write!(f, "Security error: {msg}"),
            Self::QueueNotEmpty { step_tag, count } => {
                write!(f, "{step_tag}: {count} unread bot reply(s) left in queue")
            }
            Self::ConditionGroupUnmet { step_tag, group_id } => write!(
                f,
                "{step_tag}: Non of the conditions are met in '{group_id}' condition group"
            ),
            Self::Io(err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl EngineError {
    /// Build a composite error from an ordered list of assertion failures.
    ///
    /// The message joins each cause with ",\n"; a single cause still yields a
    /// composite so callers can rely on the `errors` array when aggregation
    /// is enabled.
    pub fn composite(errors: Vec<AssertionFailure>) -> Self {
        let message = errors
            .iter()
            .map(AssertionFailure::to_string)
            .collect::<Vec<_>>()
            .join(",\n");
        EngineError::Composite { message, errors }
    }

    /// True for timeout errors (missing bot reply)
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }

    /// All assertion causes carried by this error, if any
    pub fn assertion_causes(&self) -> &[AssertionFailure] {
        match self {
            EngineError::Assertion(cause) => std::slice::from_ref(cause),
            EngineError::Composite { errors, .. } => errors,
            _ => &[],
        }
    }
}

/// A failed convo run: the error plus the partial transcript built so far
#[derive(Debug)]
pub struct RunError {
    pub error: EngineError,
    pub transcript: Transcript,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Trait for Convocheck error extensions
///
/// Provides additional context for errors: a user-friendly hint and whether
/// the retry policy is allowed to consider the error at all.
pub trait ConvocheckErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error may be retried (subject to pattern matching)
    fn is_retryable(&self) -> bool;
}

impl ConvocheckErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your configuration file for errors",
            Self::Compile(_) => "Fix the conversation script and compile again",
            Self::Configuration { .. } => "Check the plugin arguments in the script",
            Self::Assertion(_) | Self::Composite { .. } => {
                "The bot response did not match the expectation"
            }
            Self::Connector(_) => "The bot connector rejected the request. Check connectivity",
            Self::Timeout { .. } => "The bot did not reply in time. Increase the wait timeout",
            Self::Security(_) => "Enable allow_unsafe to use this scripting function",
            Self::QueueNotEmpty { .. } => {
                "The bot sent more replies than the script consumed"
            }
            Self::ConditionGroupUnmet { .. } => {
                "No branch of the condition group matched the current state"
            }
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            // Structural errors are never retried
            Self::Config(_)
            | Self::Compile(_)
            | Self::Configuration { .. }
            | Self::Security(_)
            | Self::QueueNotEmpty { .. }
            | Self::ConditionGroupUnmet { .. }
            | Self::Io(_) => false,

            // Subject to the configured retry patterns
            Self::Assertion(_)
            | Self::Composite { .. }
            | Self::Connector(_)
            | Self::Timeout { .. } => true,
        }
    }
}
