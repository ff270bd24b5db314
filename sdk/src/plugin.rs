//! Asserter / logic hook / user input plugin contract
//!
//! Each plugin category is a closed set of optional capability methods: a
//! plugin implements the subset of hook points it cares about and inherits
//! no-op defaults for the rest. Dispatch checks method presence through the
//! trait, never through name-based reflection.
//!
//! Plugins are constructed once per run and invoked per step with an
//! invocation context carrying the convo, the current step, the positional
//! string arguments, the in-flight messages and the per-run scripting
//! memory. A plugin may be registered
//! **local** (arguments come from the step reference in the script) or
//! **global** (applies to every applicable step, arguments come from its
//! registration); both may be active simultaneously and both fire.

use crate::connector::ReplyQueue;
use crate::errors::EngineError;
use crate::types::{BotMessage, ConvoStep, ScriptingMemory, Utterance};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Invocation context for logic hooks and user inputs
///
/// `me_msg` is populated on me steps (mutable, so user inputs can shape the
/// outbound message), `bot_msg` on bot steps. `convo_step` is the per-run
/// copy of the step; the bot-prepare phase may set `conditional.skip` on it.
pub struct HookContext<'a> {
    pub convo_name: &'a str,
    pub convo_step: &'a mut ConvoStep,

    /// Positional arguments. Substituted through scripting memory for user
    /// inputs; passed verbatim to logic hooks, which take variable names
    /// (`SET_SCRIPTING_MEMORY $name|...`) rather than values
    pub args: Vec<String>,

    pub me_msg: Option<&'a mut BotMessage>,
    pub bot_msg: Option<&'a BotMessage>,

    pub scripting_memory: &'a mut ScriptingMemory,

    /// Reply queue collaborator for queue-management hooks
    pub reply_queue: Option<Arc<ReplyQueue>>,

    /// True when the plugin fired from a global registration
    pub is_global: bool,

    /// Per-step override of the wait-for-bot timeout, set by hooks
    pub wait_timeout_override_ms: Option<u64>,
}

impl HookContext<'_> {
    /// Positional argument, if present
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Positional argument, or a configuration error naming the plugin
    pub fn required_arg(&self, index: usize, source: &str) -> Result<&str, EngineError> {
        self.arg(index).ok_or_else(|| EngineError::Configuration {
            step_tag: self.convo_step.step_tag.clone(),
            source: source.to_string(),
            message: format!("argument {} is required", index + 1),
        })
    }
}

/// Invocation context for asserters
///
/// Asserters read but never mutate the scripting memory; `fill()` runs
/// before assertion evaluation. `queue_length` is a snapshot of the reply
/// queue, taken for convo-end assertions.
pub struct AsserterContext<'a> {
    pub convo_name: &'a str,
    pub step_tag: &'a str,

    /// Positional arguments, substituted through scripting memory
    pub args: Vec<String>,

    /// Negation mode for this step
    pub not: bool,

    /// The received bot message; absent for convo begin/end assertions
    pub bot_msg: Option<&'a BotMessage>,

    pub scripting_memory: &'a ScriptingMemory,

    /// Utterance lists for expanding utterance-name arguments
    pub utterances: Option<&'a HashMap<String, Utterance>>,

    /// Unconsumed reply count at invocation time
    pub queue_length: usize,

    pub is_global: bool,
}

impl AsserterContext<'_> {
    /// Positional argument, if present
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Resolve an argument through the utterance lists: an argument naming an
    /// utterance expands to its alternatives, anything else stays as-is.
    pub fn expand_utterance(&self, arg: &str) -> Vec<String> {
        if let Some(utterances) = self.utterances {
            if let Some(utterance) = utterances.get(arg) {
                return utterance.alternatives.clone();
            }
        }
        vec![arg.to_string()]
    }

    /// Configuration error naming the asserter and the failing step
    pub fn config_error(&self, source: &str, message: impl Into<String>) -> EngineError {
        EngineError::Configuration {
            step_tag: self.step_tag.to_string(),
            source: source.to_string(),
            message: message.into(),
        }
    }
}

/// A plugin that judges whether an inbound message satisfies an expectation
#[async_trait]
pub trait Asserter: Send + Sync {
    /// Registered name, matched against the first token of script lines
    fn name(&self) -> &str;

    /// Invoked once before the first step of a convo
    async fn assert_convo_begin(&self, _ctx: &AsserterContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    /// Invoked for every bot step the asserter is attached to
    async fn assert_step(&self, _ctx: &AsserterContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    /// Invoked once after the last step of a convo
    async fn assert_convo_end(&self, _ctx: &AsserterContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A plugin invoked at defined lifecycle points to mutate messages, memory
/// or step flow
///
/// `on_bot_prepare` is the only point where a step's `conditional.skip` may
/// be set.
#[async_trait]
pub trait LogicHook: Send + Sync {
    /// Registered name, matched against the first token of script lines
    fn name(&self) -> &str;

    async fn on_convo_begin(&self, _ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_me_start(&self, _ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_me_end(&self, _ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_bot_start(&self, _ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_bot_prepare(&self, _ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_bot_end(&self, _ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_convo_end(&self, _ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A plugin that shapes an outbound message (buttons, media, forms) before
/// sending
#[async_trait]
pub trait UserInput: Send + Sync {
    /// Registered name, matched against the first token of script lines
    fn name(&self) -> &str;

    /// Mutate the outbound message through `ctx.me_msg`
    async fn set_user_input(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sender;

    struct NoopHook;

    #[async_trait]
    impl LogicHook for NoopHook {
        fn name(&self) -> &str {
            "NOOP"
        }
    }

    fn context<'a>(
        step: &'a mut ConvoStep,
        memory: &'a mut ScriptingMemory,
        args: Vec<String>,
    ) -> HookContext<'a> {
        HookContext {
            convo_name: "test",
            convo_step: step,
            args,
            me_msg: None,
            bot_msg: None,
            scripting_memory: memory,
            reply_queue: None,
            is_global: false,
            wait_timeout_override_ms: None,
        }
    }

    #[tokio::test]
    async fn test_default_hook_points_are_noops() {
        let mut step = ConvoStep::new(Sender::Me, "Line 1");
        let mut memory = ScriptingMemory::new();
        let mut ctx = context(&mut step, &mut memory, vec![]);

        let hook = NoopHook;
        assert!(hook.on_convo_begin(&mut ctx).await.is_ok());
        assert!(hook.on_me_start(&mut ctx).await.is_ok());
        assert!(hook.on_bot_prepare(&mut ctx).await.is_ok());
        assert!(hook.on_convo_end(&mut ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_required_arg_configuration_error() {
        let mut step = ConvoStep::new(Sender::Me, "Line 4");
        let mut memory = ScriptingMemory::new();
        let ctx = context(&mut step, &mut memory, vec!["only".to_string()]);

        assert_eq!(ctx.required_arg(0, "PAUSE").unwrap(), "only");

        let err = ctx.required_arg(1, "PAUSE").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Line 4"));
        assert!(msg.contains("PAUSE"));
        assert!(msg.contains("argument 2 is required"));
    }

    #[test]
    fn test_expand_utterance_falls_back_to_literal() {
        let memory = ScriptingMemory::new();
        let mut utterances = HashMap::new();
        utterances.insert(
            "GREETING".to_string(),
            Utterance {
                name: "GREETING".to_string(),
                alternatives: vec!["hi".to_string(), "hello".to_string()],
            },
        );

        let ctx = AsserterContext {
            convo_name: "test",
            step_tag: "Line 1",
            args: vec![],
            not: false,
            bot_msg: None,
            scripting_memory: &memory,
            utterances: Some(&utterances),
            queue_length: 0,
            is_global: false,
        };

        assert_eq!(ctx.expand_utterance("GREETING"), vec!["hi", "hello"]);
        assert_eq!(ctx.expand_utterance("literal text"), vec!["literal text"]);
    }
}
