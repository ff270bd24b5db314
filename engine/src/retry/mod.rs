//! Generic retry wrapper for asynchronous operations
//!
//! Two retry namespaces exist, one for connector calls (`retry_user_says`)
//! and one for asserter evaluation (`retry_asserter`). An error is retried
//! only when it is retryable at all (structural errors never are) AND its
//! message matches a configured pattern, or the back-compatibility
//! `retry_always` switch is set. `num_retries` counts retries after the
//! first failed attempt: a setting of 2 allows three attempts in total.

use crate::config::RetryCaps;
use regex::Regex;
use sdk::errors::{ConvocheckErrorExt, EngineError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// One configured retry trigger
#[derive(Debug, Clone)]
pub enum ErrorPattern {
    /// Substring match against the error message
    Exact(String),
    /// Regular expression match against the error message
    Regexp(Regex),
}

impl ErrorPattern {
    pub fn matches(&self, message: &str) -> bool {
        match self {
            ErrorPattern::Exact(needle) => message.contains(needle.as_str()),
            ErrorPattern::Regexp(re) => re.is_match(message),
        }
    }
}

/// Resolved settings for one retry namespace
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Retries after the first failed attempt
    pub num_retries: usize,
    /// Minimum wait between attempts
    pub min_timeout: Duration,
    pub patterns: Vec<ErrorPattern>,
    /// With no patterns configured, retry any retryable error
    pub retry_always: bool,
}

impl RetrySettings {
    /// No retries at all
    pub fn disabled() -> Self {
        Self {
            num_retries: 0,
            min_timeout: Duration::ZERO,
            patterns: Vec::new(),
            retry_always: false,
        }
    }

    /// Build settings from one retry capability namespace. Invalid regex
    /// patterns are configuration errors.
    pub fn from_caps(caps: &RetryCaps) -> Result<Self, EngineError> {
        let mut patterns: Vec<ErrorPattern> = caps
            .error_patterns
            .iter()
            .map(|pattern| ErrorPattern::Exact(pattern.clone()))
            .collect();
        for pattern in &caps.error_patterns_regexp {
            let re = Regex::new(pattern).map_err(|e| {
                EngineError::Config(format!("invalid retry error pattern \"{}\": {}", pattern, e))
            })?;
            patterns.push(ErrorPattern::Regexp(re));
        }
        Ok(Self {
            num_retries: caps.num_retries,
            min_timeout: Duration::from_millis(caps.min_timeout_ms),
            patterns,
            retry_always: caps.retry_always,
        })
    }

    /// Whether this error warrants another attempt
    pub fn should_retry(&self, err: &EngineError) -> bool {
        if self.num_retries == 0 || !err.is_retryable() {
            return false;
        }
        if self.retry_always {
            return true;
        }
        let message = err.to_string();
        self.patterns.iter().any(|pattern| pattern.matches(&message))
    }
}

/// Run `op` until it succeeds, the retry budget is spent, or an error fails
/// the pattern check. The last error is returned verbatim.
pub async fn retry<F, Fut, T>(settings: &RetrySettings, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= settings.num_retries || !settings.should_retry(&err) {
                    return Err(err);
                }
                attempt += 1;
                warn!(
                    "attempt {} failed ({}), retrying in {:?}",
                    attempt, err, settings.min_timeout
                );
                tokio::time::sleep(settings.min_timeout).await;
            }
        }
    }
}
