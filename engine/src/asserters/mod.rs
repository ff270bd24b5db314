//! Built-in asserter library
//!
//! Two asserter families cover most expectations: text asserters
//! (policy × match predicate over the message's text fragments) and count
//! asserters (element counter × comparison expression). The consumed-replies
//! asserter runs at convo end and bounds the number of unread bot replies.
//!
//! Registered names:
//!
//! | Name | Behavior |
//! |------|----------|
//! | `TEXT_CONTAINS_ANY` | any argument contained in the text (lowercase) |
//! | `TEXT_CONTAINS_ALL` | all arguments contained in the text (lowercase) |
//! | `TEXT_REGEXP_ANY` | any argument matches as a regular expression |
//! | `TEXT_WILDCARD_ANY` | any argument matches as a `*` wildcard |
//! | `TEXT_EQUALS` | the text equals one of the arguments |
//! | `BUTTONS` / `MEDIA` / `CARDS` / `FORMS` | element count comparison |
//! | `BOT_UNCONSUMED_COUNT` | unread replies at convo end |

pub mod count;
pub mod text;

use crate::dispatch::PluginRegistry;
use std::sync::Arc;

pub use count::{BotRepliesConsumedAsserter, Comparison, CountAsserter};
pub use text::{TextAsserter, TextMatchPolicy};

/// Register the built-in asserters under their script names
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register_asserter("TEXT_CONTAINS_ANY", Arc::new(TextAsserter::contains_any()));
    registry.register_asserter("TEXT_CONTAINS_ALL", Arc::new(TextAsserter::contains_all()));
    registry.register_asserter("TEXT_REGEXP_ANY", Arc::new(TextAsserter::regexp_any()));
    registry.register_asserter("TEXT_WILDCARD_ANY", Arc::new(TextAsserter::wildcard_any()));
    registry.register_asserter("TEXT_EQUALS", Arc::new(TextAsserter::equals()));
    registry.register_asserter("BUTTONS", Arc::new(CountAsserter::buttons()));
    registry.register_asserter("MEDIA", Arc::new(CountAsserter::media()));
    registry.register_asserter("CARDS", Arc::new(CountAsserter::cards()));
    registry.register_asserter("FORMS", Arc::new(CountAsserter::forms()));
    registry.register_asserter(
        "BOT_UNCONSUMED_COUNT",
        Arc::new(BotRepliesConsumedAsserter::new()),
    );
}
