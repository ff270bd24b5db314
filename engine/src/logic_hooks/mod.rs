//! Built-in logic hook library
//!
//! Logic hooks mutate messages, scripting memory or step flow at defined
//! lifecycle points. Registered names:
//!
//! | Name | Points | Behavior |
//! |------|--------|----------|
//! | `SET_SCRIPTING_MEMORY` | convo begin, me start | set `$name` to a value |
//! | `CLEAR_SCRIPTING_MEMORY` | convo begin, me start | remove named entries or all |
//! | `UPDATE_CUSTOM` | me start | set a field on the outgoing message's source data |
//! | `PAUSE` | me end, bot start | sleep for the given milliseconds |
//! | `WAITFORBOT` | me end, bot start | override the wait-for-bot timeout |
//! | `CONDITION_SCRIPTING_MEMORY` | bot prepare | skip the step unless a memory entry matches |
//! | `CLEAR_QUEUE` | me start | drop all queued bot replies |
//! | `INCLUDE` | none | placeholder; resolved by the compiler |

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::plugin::{HookContext, LogicHook};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::dispatch::PluginRegistry;

/// Register the built-in logic hooks under their script names
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register_logic_hook("SET_SCRIPTING_MEMORY", Arc::new(SetScriptingMemoryHook));
    registry.register_logic_hook("CLEAR_SCRIPTING_MEMORY", Arc::new(ClearScriptingMemoryHook));
    registry.register_logic_hook("UPDATE_CUSTOM", Arc::new(UpdateCustomHook));
    registry.register_logic_hook("PAUSE", Arc::new(PauseHook));
    registry.register_logic_hook("WAITFORBOT", Arc::new(WaitForBotHook));
    registry.register_logic_hook("CONDITION_SCRIPTING_MEMORY", Arc::new(ConditionalStepHook));
    registry.register_logic_hook("CLEAR_QUEUE", Arc::new(ClearQueueHook));
    registry.register_logic_hook("INCLUDE", Arc::new(IncludeHook));
}

fn normalize_var_name(name: &str) -> String {
    if name.starts_with('$') {
        name.to_string()
    } else {
        format!("${}", name)
    }
}

/// Set a scripting memory entry: `SET_SCRIPTING_MEMORY $name|value`
pub struct SetScriptingMemoryHook;

impl SetScriptingMemoryHook {
    fn apply(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        let name = normalize_var_name(ctx.required_arg(0, "SET_SCRIPTING_MEMORY")?);
        let value = ctx.arg(1).unwrap_or_default().to_string();
        debug!("setting scripting memory {} = \"{}\"", name, value);
        ctx.scripting_memory.insert(name, value);
        Ok(())
    }
}

#[async_trait]
impl LogicHook for SetScriptingMemoryHook {
    fn name(&self) -> &str {
        "SET_SCRIPTING_MEMORY"
    }

    async fn on_convo_begin(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        self.apply(ctx)
    }

    async fn on_me_start(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        self.apply(ctx)
    }
}

/// Remove scripting memory entries: named arguments, or everything with no
/// arguments
pub struct ClearScriptingMemoryHook;

impl ClearScriptingMemoryHook {
    fn apply(&self, ctx: &mut HookContext<'_>) {
        if ctx.args.is_empty() {
            debug!("clearing all scripting memory entries");
            ctx.scripting_memory.clear();
            return;
        }
        for arg in ctx.args.clone() {
            ctx.scripting_memory.remove(&normalize_var_name(&arg));
        }
    }
}

#[async_trait]
impl LogicHook for ClearScriptingMemoryHook {
    fn name(&self) -> &str {
        "CLEAR_SCRIPTING_MEMORY"
    }

    async fn on_convo_begin(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        self.apply(ctx);
        Ok(())
    }

    async fn on_me_start(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        self.apply(ctx);
        Ok(())
    }
}

/// Set a field on the outgoing message's source data:
/// `UPDATE_CUSTOM /json/pointer|value`
pub struct UpdateCustomHook;

#[async_trait]
impl LogicHook for UpdateCustomHook {
    fn name(&self) -> &str {
        "UPDATE_CUSTOM"
    }

    async fn on_me_start(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        let pointer = ctx.required_arg(0, "UPDATE_CUSTOM")?.to_string();
        let value = ctx.arg(1).unwrap_or_default().to_string();

        let me_msg = match ctx.me_msg.as_deref_mut() {
            Some(msg) => msg,
            None => return Ok(()),
        };
        let source_data = me_msg
            .source_data
            .get_or_insert_with(|| serde_json::Value::Object(Default::default()));
        set_json_pointer(source_data, &pointer, serde_json::Value::String(value)).map_err(
            |message| EngineError::Configuration {
                step_tag: ctx.convo_step.step_tag.clone(),
                source: "UPDATE_CUSTOM".to_string(),
                message,
            },
        )
    }
}

/// Set a value at a JSON pointer path, creating intermediate objects
fn set_json_pointer(
    root: &mut serde_json::Value,
    pointer: &str,
    value: serde_json::Value,
) -> Result<(), String> {
    let path: Vec<&str> = pointer
        .strip_prefix('/')
        .ok_or_else(|| format!("JSON pointer \"{}\" must start with '/'", pointer))?
        .split('/')
        .collect();
    let mut current = root;
    for (index, segment) in path.iter().enumerate() {
        let object = current
            .as_object_mut()
            .ok_or_else(|| format!("JSON pointer \"{}\" crosses a non-object value", pointer))?;
        if index == path.len() - 1 {
            object.insert((*segment).to_string(), value);
            return Ok(());
        }
        current = object
            .entry((*segment).to_string())
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
    }
    Err(format!("JSON pointer \"{}\" is empty", pointer))
}

/// Sleep for the given milliseconds: `PAUSE 500`
pub struct PauseHook;

impl PauseHook {
    async fn apply(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        let raw = ctx.required_arg(0, "PAUSE")?;
        let ms: u64 = raw.parse().map_err(|_| EngineError::Configuration {
            step_tag: ctx.convo_step.step_tag.clone(),
            source: "PAUSE".to_string(),
            message: format!("pause duration must be a number, got \"{}\"", raw),
        })?;
        debug!("pausing for {}ms", ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

#[async_trait]
impl LogicHook for PauseHook {
    fn name(&self) -> &str {
        "PAUSE"
    }

    async fn on_me_end(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        self.apply(ctx).await
    }

    async fn on_bot_start(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        self.apply(ctx).await
    }
}

/// Override the wait-for-bot timeout for the next bot step: `WAITFORBOT 60000`
pub struct WaitForBotHook;

impl WaitForBotHook {
    fn apply(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        let raw = ctx.required_arg(0, "WAITFORBOT")?;
        let ms: u64 = raw.parse().map_err(|_| EngineError::Configuration {
            step_tag: ctx.convo_step.step_tag.clone(),
            source: "WAITFORBOT".to_string(),
            message: format!("wait timeout must be a number, got \"{}\"", raw),
        })?;
        ctx.wait_timeout_override_ms = Some(ms);
        Ok(())
    }
}

#[async_trait]
impl LogicHook for WaitForBotHook {
    fn name(&self) -> &str {
        "WAITFORBOT"
    }

    async fn on_me_end(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        self.apply(ctx)
    }

    async fn on_bot_start(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        self.apply(ctx)
    }
}

/// Gate a condition group member on a scripting memory entry:
/// `CONDITION_SCRIPTING_MEMORY group|$name|expected`
///
/// A non-matching (or missing) entry marks the step skipped; the step
/// executes only when the stored value equals the expected one.
pub struct ConditionalStepHook;

#[async_trait]
impl LogicHook for ConditionalStepHook {
    fn name(&self) -> &str {
        "CONDITION_SCRIPTING_MEMORY"
    }

    async fn on_bot_prepare(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        ctx.required_arg(0, "CONDITION_SCRIPTING_MEMORY")?;
        let name = normalize_var_name(ctx.required_arg(1, "CONDITION_SCRIPTING_MEMORY")?);
        let expected = ctx.required_arg(2, "CONDITION_SCRIPTING_MEMORY")?.to_string();

        let matches = ctx.scripting_memory.get(&name).map(String::as_str) == Some(expected.as_str());
        if let Some(conditional) = &mut ctx.convo_step.conditional {
            conditional.skip = !matches;
            debug!(
                "condition group {} member {}: {} == \"{}\" is {}",
                conditional.condition_group_id, ctx.convo_step.step_tag, name, expected, matches
            );
        } else {
            warn!(
                "{}: CONDITION_SCRIPTING_MEMORY on a step without a condition group",
                ctx.convo_step.step_tag
            );
        }
        Ok(())
    }
}

/// Drop every queued bot reply before sending: `CLEAR_QUEUE`
pub struct ClearQueueHook;

#[async_trait]
impl LogicHook for ClearQueueHook {
    fn name(&self) -> &str {
        "CLEAR_QUEUE"
    }

    async fn on_me_start(&self, ctx: &mut HookContext<'_>) -> Result<(), EngineError> {
        if let Some(queue) = ctx.reply_queue.clone() {
            let dropped = queue.drain().await;
            if dropped > 0 {
                debug!("cleared {} queued bot reply(s)", dropped);
            }
        }
        Ok(())
    }
}

/// Placeholder for the compiler's INCLUDE directive. Expansion removes every
/// reference before execution; a surviving one is a no-op.
pub struct IncludeHook;

#[async_trait]
impl LogicHook for IncludeHook {
    fn name(&self) -> &str {
        "INCLUDE"
    }
}
