//! Count asserter family
//!
//! A count asserter pairs an element counter with a comparison expression
//! argument: `<=N`, `<N`, `>=N`, `>N`, `==N`, `=N` or plain `N` (equality).
//! Without an argument the expectation is "at least one" (`>0`).

use async_trait::async_trait;
use sdk::errors::{AssertionFailure, EngineError};
use sdk::plugin::{Asserter, AsserterContext};
use sdk::types::BotMessage;
use serde_json::json;
use std::fmt;

/// A parsed comparison expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Le(usize),
    Lt(usize),
    Ge(usize),
    Gt(usize),
    Eq(usize),
}

impl Comparison {
    /// Parse an expression argument; `None` for a malformed one
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (build, number): (fn(usize) -> Self, &str) = if let Some(rest) = raw.strip_prefix("<=") {
            (Comparison::Le, rest)
        } else if let Some(rest) = raw.strip_prefix(">=") {
            (Comparison::Ge, rest)
        } else if let Some(rest) = raw.strip_prefix("==") {
            (Comparison::Eq, rest)
        } else if let Some(rest) = raw.strip_prefix('<') {
            (Comparison::Lt, rest)
        } else if let Some(rest) = raw.strip_prefix('>') {
            (Comparison::Gt, rest)
        } else if let Some(rest) = raw.strip_prefix('=') {
            (Comparison::Eq, rest)
        } else {
            (Comparison::Eq, raw)
        };
        number.trim().parse().ok().map(build)
    }

    /// Evaluate the comparison against an actual count
    pub fn eval(&self, count: usize) -> bool {
        match *self {
            Comparison::Le(n) => count <= n,
            Comparison::Lt(n) => count < n,
            Comparison::Ge(n) => count >= n,
            Comparison::Gt(n) => count > n,
            Comparison::Eq(n) => count == n,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Comparison::Le(n) => write!(f, "<= {}", n),
            Comparison::Lt(n) => write!(f, "< {}", n),
            Comparison::Ge(n) => write!(f, ">= {}", n),
            Comparison::Gt(n) => write!(f, "> {}", n),
            Comparison::Eq(n) => write!(f, "{}", n),
        }
    }
}

/// An element-count expectation on the bot message
pub struct CountAsserter {
    name: &'static str,
    label: &'static str,
    counter: fn(&BotMessage) -> usize,
}

impl CountAsserter {
    pub fn buttons() -> Self {
        Self {
            name: "BUTTONS",
            label: "Buttons",
            counter: |msg| msg.buttons.len(),
        }
    }

    pub fn media() -> Self {
        Self {
            name: "MEDIA",
            label: "Media",
            counter: |msg| msg.media.len(),
        }
    }

    pub fn cards() -> Self {
        Self {
            name: "CARDS",
            label: "Cards",
            counter: |msg| msg.cards.len(),
        }
    }

    pub fn forms() -> Self {
        Self {
            name: "FORMS",
            label: "Forms",
            counter: |msg| msg.forms.len(),
        }
    }
}

fn check_count(
    name: &str,
    label: &str,
    count: usize,
    ctx: &AsserterContext<'_>,
) -> Result<(), EngineError> {
    let comparison = match ctx.arg(0) {
        Some(raw) => Comparison::parse(raw)
            .ok_or_else(|| ctx.config_error(name, format!("invalid count expression \"{}\"", raw)))?,
        None => Comparison::Gt(0),
    };

    let ok = comparison.eval(count);
    match (ok, ctx.not) {
        (true, false) | (false, true) => Ok(()),
        (false, false) => Err(EngineError::Assertion(
            AssertionFailure::new(
                name,
                ctx.step_tag,
                false,
                format!("Expected {} count {} to be {}", label, count, comparison),
            )
            .with_expected(json!(comparison.to_string()))
            .with_actual(json!(count)),
        )),
        (true, true) => Err(EngineError::Assertion(
            AssertionFailure::new(
                name,
                ctx.step_tag,
                true,
                format!("Expected {} count {} not to be {}", label, count, comparison),
            )
            .with_expected(json!(comparison.to_string()))
            .with_actual(json!(count)),
        )),
    }
}

#[async_trait]
impl Asserter for CountAsserter {
    fn name(&self) -> &str {
        self.name
    }

    async fn assert_step(&self, ctx: &AsserterContext<'_>) -> Result<(), EngineError> {
        let bot_msg = match ctx.bot_msg {
            Some(msg) => msg,
            None => return Ok(()),
        };
        check_count(self.name, self.label, (self.counter)(bot_msg), ctx)
    }
}

/// Convo-end expectation bounding the number of unread bot replies.
///
/// Default bound is zero: the script must have consumed every reply.
pub struct BotRepliesConsumedAsserter;

impl BotRepliesConsumedAsserter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BotRepliesConsumedAsserter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Asserter for BotRepliesConsumedAsserter {
    fn name(&self) -> &str {
        "BOT_UNCONSUMED_COUNT"
    }

    async fn assert_convo_end(&self, ctx: &AsserterContext<'_>) -> Result<(), EngineError> {
        let comparison = match ctx.arg(0) {
            Some(raw) => Comparison::parse(raw).ok_or_else(|| {
                ctx.config_error(self.name(), format!("invalid count expression \"{}\"", raw))
            })?,
            None => Comparison::Eq(0),
        };
        let count = ctx.queue_length;
        if comparison.eval(count) != ctx.not {
            Ok(())
        } else if ctx.not {
            Err(EngineError::Assertion(AssertionFailure::new(
                self.name(),
                ctx.step_tag,
                true,
                format!("Expected unconsumed bot reply count {} not to be {}", count, comparison),
            )))
        } else {
            Err(EngineError::Assertion(AssertionFailure::new(
                self.name(),
                ctx.step_tag,
                false,
                format!("Expected unconsumed bot reply count {} to be {}", count, comparison),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::ScriptingMemory;

    fn ctx<'a>(
        bot_msg: Option<&'a BotMessage>,
        memory: &'a ScriptingMemory,
        args: Vec<&str>,
        not: bool,
        queue_length: usize,
    ) -> AsserterContext<'a> {
        AsserterContext {
            convo_name: "test",
            step_tag: "Line 12",
            args: args.into_iter().map(String::from).collect(),
            not,
            bot_msg,
            scripting_memory: memory,
            utterances: None,
            queue_length,
            is_global: false,
        }
    }

    #[test]
    fn test_comparison_parsing() {
        assert_eq!(Comparison::parse("3"), Some(Comparison::Eq(3)));
        assert_eq!(Comparison::parse("=3"), Some(Comparison::Eq(3)));
        assert_eq!(Comparison::parse("==3"), Some(Comparison::Eq(3)));
        assert_eq!(Comparison::parse("<=2"), Some(Comparison::Le(2)));
        assert_eq!(Comparison::parse("< 2"), Some(Comparison::Lt(2)));
        assert_eq!(Comparison::parse(">= 1"), Some(Comparison::Ge(1)));
        assert_eq!(Comparison::parse(">0"), Some(Comparison::Gt(0)));
        assert_eq!(Comparison::parse("abc"), None);
        assert_eq!(Comparison::parse("<="), None);
    }

    #[test]
    fn test_comparison_eval() {
        assert!(Comparison::Le(2).eval(2));
        assert!(!Comparison::Lt(2).eval(2));
        assert!(Comparison::Ge(1).eval(4));
        assert!(Comparison::Gt(0).eval(1));
        assert!(!Comparison::Gt(0).eval(0));
        assert!(Comparison::Eq(3).eval(3));
    }

    #[tokio::test]
    async fn test_buttons_count_failure_message() {
        let msg = BotMessage::text("pick")
            .with_button("a", None)
            .with_button("b", None)
            .with_button("c", None)
            .with_button("d", None);
        let memory = ScriptingMemory::new();

        let err = CountAsserter::buttons()
            .assert_step(&ctx(Some(&msg), &memory, vec!["3"], false, 0))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Line 12: Expected Buttons count 4 to be 3");
    }

    #[tokio::test]
    async fn test_default_expression_is_at_least_one() {
        let memory = ScriptingMemory::new();
        let with_button = BotMessage::text("x").with_button("ok", None);
        assert!(CountAsserter::buttons()
            .assert_step(&ctx(Some(&with_button), &memory, vec![], false, 0))
            .await
            .is_ok());

        let without = BotMessage::text("x");
        let err = CountAsserter::buttons()
            .assert_step(&ctx(Some(&without), &memory, vec![], false, 0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("to be > 0"));
    }

    #[tokio::test]
    async fn test_not_mode() {
        let msg = BotMessage::text("x").with_button("ok", None);
        let memory = ScriptingMemory::new();

        assert!(CountAsserter::buttons()
            .assert_step(&ctx(Some(&msg), &memory, vec!["2"], true, 0))
            .await
            .is_ok());
        let err = CountAsserter::buttons()
            .assert_step(&ctx(Some(&msg), &memory, vec!["1"], true, 0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not to be 1"));
    }

    #[tokio::test]
    async fn test_invalid_expression_is_configuration_error() {
        let msg = BotMessage::text("x");
        let memory = ScriptingMemory::new();
        let err = CountAsserter::buttons()
            .assert_step(&ctx(Some(&msg), &memory, vec!["lots"], false, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_media_and_cards_counters() {
        let memory = ScriptingMemory::new();
        let msg = BotMessage::text("x")
            .with_media("http://example.com/a.png")
            .with_card(sdk::types::Card {
                text: "c".to_string(),
                subtext: None,
                buttons: vec![],
                media: vec![],
            });

        assert!(CountAsserter::media()
            .assert_step(&ctx(Some(&msg), &memory, vec!["1"], false, 0))
            .await
            .is_ok());
        assert!(CountAsserter::cards()
            .assert_step(&ctx(Some(&msg), &memory, vec!["1"], false, 0))
            .await
            .is_ok());
        assert!(CountAsserter::forms()
            .assert_step(&ctx(Some(&msg), &memory, vec!["0"], false, 0))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unconsumed_default_bound_is_zero() {
        let memory = ScriptingMemory::new();
        let asserter = BotRepliesConsumedAsserter::new();

        assert!(asserter
            .assert_convo_end(&ctx(None, &memory, vec![], false, 0))
            .await
            .is_ok());
        let err = asserter
            .assert_convo_end(&ctx(None, &memory, vec![], false, 2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unconsumed bot reply count 2 to be 0"));
    }

    #[tokio::test]
    async fn test_unconsumed_custom_bound() {
        let memory = ScriptingMemory::new();
        let asserter = BotRepliesConsumedAsserter::new();
        assert!(asserter
            .assert_convo_end(&ctx(None, &memory, vec!["<=2"], false, 2))
            .await
            .is_ok());
    }
}
