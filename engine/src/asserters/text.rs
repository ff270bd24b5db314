//! Text asserter family
//!
//! One implementation parameterized by match predicate and policy. Arguments
//! naming an utterance list expand to its alternatives before matching; the
//! match runs over every text fragment of the bot message (message text,
//! card texts and subtexts).

use crate::matching::{self, MatchingMode};
use async_trait::async_trait;
use sdk::errors::{AssertionFailure, EngineError};
use sdk::plugin::{Asserter, AsserterContext};
use serde_json::json;

/// How many argument patterns must match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatchPolicy {
    Any,
    All,
}

/// A text expectation over the bot message's text fragments
pub struct TextAsserter {
    name: &'static str,
    mode: MatchingMode,
    policy: TextMatchPolicy,
    /// With no arguments, assert that the message carries any text at all
    no_arg_is_joker: bool,
}

impl TextAsserter {
    pub fn contains_any() -> Self {
        Self {
            name: "TEXT_CONTAINS_ANY",
            mode: MatchingMode::IncludeLowercase,
            policy: TextMatchPolicy::Any,
            no_arg_is_joker: true,
        }
    }

    pub fn contains_all() -> Self {
        Self {
            name: "TEXT_CONTAINS_ALL",
            mode: MatchingMode::IncludeLowercase,
            policy: TextMatchPolicy::All,
            no_arg_is_joker: true,
        }
    }

    pub fn regexp_any() -> Self {
        Self {
            name: "TEXT_REGEXP_ANY",
            mode: MatchingMode::Regexp,
            policy: TextMatchPolicy::Any,
            no_arg_is_joker: false,
        }
    }

    pub fn wildcard_any() -> Self {
        Self {
            name: "TEXT_WILDCARD_ANY",
            mode: MatchingMode::WildcardLowercase,
            policy: TextMatchPolicy::Any,
            no_arg_is_joker: true,
        }
    }

    pub fn equals() -> Self {
        Self {
            name: "TEXT_EQUALS",
            mode: MatchingMode::Equals,
            policy: TextMatchPolicy::Any,
            no_arg_is_joker: false,
        }
    }

    fn failure(
        &self,
        ctx: &AsserterContext<'_>,
        patterns: &[String],
        actual: &str,
        message: String,
    ) -> EngineError {
        EngineError::Assertion(
            AssertionFailure::new(self.name, ctx.step_tag, ctx.not, message)
                .with_expected(json!(patterns))
                .with_actual(json!(actual)),
        )
    }
}

#[async_trait]
impl Asserter for TextAsserter {
    fn name(&self) -> &str {
        self.name
    }

    async fn assert_step(&self, ctx: &AsserterContext<'_>) -> Result<(), EngineError> {
        let bot_msg = match ctx.bot_msg {
            Some(msg) => msg,
            None => return Ok(()),
        };
        let fragments = bot_msg.text_fragments();
        let actual = fragments.join(" ");

        let mut patterns: Vec<String> = Vec::new();
        for arg in &ctx.args {
            patterns.extend(ctx.expand_utterance(arg));
        }

        if patterns.is_empty() {
            if !self.no_arg_is_joker {
                return Err(ctx.config_error(self.name, "at least one argument is required"));
            }
            let has_text = fragments.iter().any(|fragment| !fragment.is_empty());
            return match (has_text, ctx.not) {
                (true, false) | (false, true) => Ok(()),
                (false, false) => Err(self.failure(
                    ctx,
                    &patterns,
                    &actual,
                    "Expected any bot text, got none".to_string(),
                )),
                (true, true) => Err(self.failure(
                    ctx,
                    &patterns,
                    &actual,
                    format!("Expected no bot text, got \"{}\"", actual),
                )),
            };
        }

        let mut matched: Vec<&str> = Vec::new();
        let mut unmatched: Vec<&str> = Vec::new();
        for pattern in &patterns {
            let mut hit = false;
            for fragment in &fragments {
                hit = matching::matches(self.mode, fragment, pattern)
                    .map_err(|e| ctx.config_error(self.name, format!("invalid pattern \"{}\": {}", pattern, e)))?;
                if hit {
                    break;
                }
            }
            if hit {
                matched.push(pattern);
            } else {
                unmatched.push(pattern);
            }
        }

        let ok = match self.policy {
            TextMatchPolicy::Any => !matched.is_empty(),
            TextMatchPolicy::All => unmatched.is_empty(),
        };

        match (ok, ctx.not) {
            (true, false) | (false, true) => Ok(()),
            (false, false) => {
                let message = match self.policy {
                    TextMatchPolicy::Any => format!(
                        "Expected bot text \"{}\" to match one of {:?}",
                        actual, patterns
                    ),
                    TextMatchPolicy::All => format!(
                        "Expected bot text \"{}\" to match all of {:?}, missing {:?}",
                        actual, patterns, unmatched
                    ),
                };
                Err(self.failure(ctx, &patterns, &actual, message))
            }
            (true, true) => Err(self.failure(
                ctx,
                &patterns,
                &actual,
                format!(
                    "Expected bot text \"{}\" NOT to match {:?}",
                    actual, matched
                ),
            )),
        }
    }
}
