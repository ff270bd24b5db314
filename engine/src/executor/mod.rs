//! Convo execution engine
//!
//! [`ConvoRunner::run`] plays one compiled convo against a container and
//! produces a timestamped [`Transcript`]. Per-step flow:
//!
//! - **me**: me-start hooks → scripting memory substitution → user inputs →
//!   rate-limited, retried `user_says` → me-end hooks
//! - **bot**: bot-start hooks → (conditional steps: bot-prepare gate before
//!   consuming a reply) → bounded wait → bot-prepare hooks → memory fill →
//!   retried assertion evaluation → bot-end hooks
//!
//! A conditional step evaluates its gate before waiting, so a skipped
//! branch never consumes a queued reply. An optional bot step that sees no
//! reply in time is skipped silently. On failure the partial transcript is
//! attached to the error.

use crate::config::Caps;
use crate::container::Container;
use crate::dispatch::{
    ConditionalGroupTracker, HookPhase, PluginRegistry, ResolvedAsserter, ResolvedHook,
};
use crate::matching;
use crate::rate_limiter::RateLimiter;
use crate::retry::{retry, RetrySettings};
use crate::scripting_memory;
use chrono::Utc;
use sdk::connector::ReplyQueue;
use sdk::errors::{AssertionFailure, EngineError, RunError};
use sdk::plugin::{AsserterContext, HookContext};
use sdk::types::{
    BotMessage, Convo, ConvoStep, ScriptingMemory, Sender, Transcript, TranscriptStep, Utterance,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Source name used for the implicit expected-text assertion
const TEXT_MATCH: &str = "TEXT_MATCH";

/// Name of the convo-end asserter governing unconsumed replies
const UNCONSUMED_ASSERTER: &str = "BOT_UNCONSUMED_COUNT";

pub struct ConvoRunner {
    caps: Caps,
    registry: Arc<PluginRegistry>,
    retry_user_says: RetrySettings,
    retry_asserter: RetrySettings,
    rate_limiter: RateLimiter,
    utterances: HashMap<String, Utterance>,
}

impl ConvoRunner {
    pub fn new(caps: Caps, registry: Arc<PluginRegistry>) -> Result<Self, EngineError> {
        let retry_user_says = RetrySettings::from_caps(&caps.retry_user_says)?;
        let retry_asserter = RetrySettings::from_caps(&caps.retry_asserter)?;
        let rate_limiter = RateLimiter::new(&caps.rate_limit);
        Ok(Self {
            caps,
            registry,
            retry_user_says,
            retry_asserter,
            rate_limiter,
            utterances: HashMap::new(),
        })
    }

    /// Attach the utterance lists used for expected-text alternatives and
    /// asserter argument expansion
    pub fn with_utterances(mut self, utterances: HashMap<String, Utterance>) -> Self {
        self.utterances = utterances;
        self
    }

    /// Play one convo. On failure the error carries the partial transcript.
    pub async fn run(&self, convo: &Convo, container: &Container) -> Result<Transcript, RunError> {
        info!("running convo \"{}\"", convo.header.name);
        let mut memory = convo.scripting_memory.clone();
        let mut transcript = Transcript::begin(memory.clone());

        match self
            .run_inner(convo, container, &mut memory, &mut transcript)
            .await
        {
            Ok(()) => {
                transcript.finish(memory, None);
                Ok(transcript)
            }
            Err(error) => {
                transcript.finish(memory, Some(error.to_string()));
                Err(RunError { error, transcript })
            }
        }
    }

    async fn run_inner(
        &self,
        convo: &Convo,
        container: &Container,
        memory: &mut ScriptingMemory,
        transcript: &mut Transcript,
    ) -> Result<(), EngineError> {
        let queue = container.queue();
        let mut tracker = ConditionalGroupTracker::new();
        let mut wait_override: Option<u64> = None;

        let globals = self.registry.global_hooks()?;
        let mut boundary_step = ConvoStep::new(Sender::Me, "convo begin");
        self.run_hook_phase(
            HookPhase::ConvoBegin,
            &globals,
            &convo.header.name,
            &mut boundary_step,
            memory,
            None,
            None,
            &queue,
            &mut wait_override,
        )
        .await?;
        self.assert_boundary(convo, container, memory, true).await?;

        for step in &convo.conversation {
            match step.sender {
                Sender::Me => {
                    self.run_me_step(convo, step, container, memory, transcript, &queue, &mut wait_override)
                        .await?
                }
                Sender::Bot => {
                    self.run_bot_step(
                        convo,
                        step,
                        container,
                        memory,
                        transcript,
                        &queue,
                        &mut tracker,
                        &mut wait_override,
                    )
                    .await?
                }
            }
        }

        let mut boundary_step = ConvoStep::new(Sender::Me, "convo end");
        self.run_hook_phase(
            HookPhase::ConvoEnd,
            &globals,
            &convo.header.name,
            &mut boundary_step,
            memory,
            None,
            None,
            &queue,
            &mut wait_override,
        )
        .await?;
        self.assert_boundary(convo, container, memory, false).await?;

        // Unconsumed replies fail the convo unless an asserter governs them
        if !convo_references_asserter(convo, &self.registry, UNCONSUMED_ASSERTER) {
            let count = container.queue_length().await;
            if count > 0 {
                return Err(EngineError::QueueNotEmpty {
                    step_tag: "convo end".to_string(),
                    count,
                });
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_me_step(
        &self,
        convo: &Convo,
        step: &ConvoStep,
        container: &Container,
        memory: &mut ScriptingMemory,
        transcript: &mut Transcript,
        queue: &Arc<ReplyQueue>,
        wait_override: &mut Option<u64>,
    ) -> Result<(), EngineError> {
        let step_begin = Utc::now();
        let mut step_run = step.clone();
        let mut me_msg = BotMessage {
            message_text: step.message_text.clone(),
            source_data: step.source_data.clone(),
            ..Default::default()
        };

        let hooks = self.registry.hooks_for_step(step)?;
        self.run_hook_phase(
            HookPhase::MeStart,
            &hooks,
            &convo.header.name,
            &mut step_run,
            memory,
            Some(&mut me_msg),
            None,
            queue,
            wait_override,
        )
        .await?;

        if let Some(text) = me_msg.message_text.take() {
            me_msg.message_text = Some(scripting_memory::apply(&self.caps, memory, None, &text)?);
        }

        for input in self.registry.user_inputs_for_step(step)? {
            let args = scripting_memory::apply_to_args(&self.caps, memory, None, &input.args)?;
            let mut ctx = HookContext {
                convo_name: &convo.header.name,
                convo_step: &mut step_run,
                args,
                me_msg: Some(&mut me_msg),
                bot_msg: None,
                scripting_memory: memory,
                reply_queue: Some(Arc::clone(queue)),
                is_global: false,
                wait_timeout_override_ms: *wait_override,
            };
            input.plugin.set_user_input(&mut ctx).await?;
        }

        let send_msg = me_msg.clone();
        self.rate_limiter
            .run(|| {
                retry(&self.retry_user_says, || {
                    let msg = send_msg.clone();
                    async move { container.user_says(&msg).await }
                })
            })
            .await
            .map_err(|err| match err {
                EngineError::Connector(message) => {
                    EngineError::Connector(format!("{}: {}", step.step_tag, message))
                }
                other => other,
            })?;

        self.run_hook_phase(
            HookPhase::MeEnd,
            &hooks,
            &convo.header.name,
            &mut step_run,
            memory,
            Some(&mut me_msg),
            None,
            queue,
            wait_override,
        )
        .await?;

        transcript.steps.push(TranscriptStep {
            step_begin,
            step_end: Utc::now(),
            actual: Some(me_msg),
            expected: None,
            not: step.not,
            err: None,
            scripting_memory: memory.clone(),
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_bot_step(
        &self,
        convo: &Convo,
        step: &ConvoStep,
        container: &Container,
        memory: &mut ScriptingMemory,
        transcript: &mut Transcript,
        queue: &Arc<ReplyQueue>,
        tracker: &mut ConditionalGroupTracker,
        wait_override: &mut Option<u64>,
    ) -> Result<(), EngineError> {
        let step_begin = Utc::now();
        let mut step_run = step.clone();
        let hooks = self.registry.hooks_for_step(step)?;

        self.run_hook_phase(
            HookPhase::BotStart,
            &hooks,
            &convo.header.name,
            &mut step_run,
            memory,
            None,
            None,
            queue,
            wait_override,
        )
        .await?;

        // Conditional steps decide before a reply is consumed
        let is_conditional = step.conditional.is_some();
        if is_conditional {
            self.run_hook_phase(
                HookPhase::BotPrepare,
                &hooks,
                &convo.header.name,
                &mut step_run,
                memory,
                None,
                None,
                queue,
                wait_override,
            )
            .await?;

            if let Some(conditional) = step_run.conditional.clone() {
                tracker.record(&conditional.condition_group_id, !conditional.skip);
                if conditional.skip {
                    debug!(
                        "{}: condition group {} member skipped",
                        step.step_tag, conditional.condition_group_id
                    );
                    if conditional.condition_group_end {
                        tracker.check_group_end(&step.step_tag, &conditional.condition_group_id)?;
                    }
                    transcript.steps.push(skipped_entry(step, step_begin, memory));
                    return Ok(());
                }
            }
        }

        let timeout_ms = wait_override
            .take()
            .unwrap_or(self.caps.wait_for_bot_timeout_ms);
        let msg = match container.wait_bot_says(timeout_ms).await {
            Some(msg) => msg,
            None => {
                if step.optional {
                    debug!("{}: optional step skipped, no bot reply", step.step_tag);
                    transcript.steps.push(skipped_entry(step, step_begin, memory));
                    return Ok(());
                }
                return Err(EngineError::Timeout {
                    step_tag: step.step_tag.clone(),
                    timeout_ms,
                });
            }
        };

        if !is_conditional {
            self.run_hook_phase(
                HookPhase::BotPrepare,
                &hooks,
                &convo.header.name,
                &mut step_run,
                memory,
                None,
                Some(&msg),
                queue,
                wait_override,
            )
            .await?;
        }

        if let Some(expected) = step.message_text.as_deref() {
            let actual = msg.message_text.clone().unwrap_or_default();
            scripting_memory::fill(&self.caps, memory, &actual, expected, &self.utterances);
        }

        retry(&self.retry_asserter, || {
            self.evaluate_bot_step(convo, step, &msg, &*memory, container)
        })
        .await?;

        self.run_hook_phase(
            HookPhase::BotEnd,
            &hooks,
            &convo.header.name,
            &mut step_run,
            memory,
            None,
            Some(&msg),
            queue,
            wait_override,
        )
        .await?;

        transcript.steps.push(TranscriptStep {
            step_begin,
            step_end: Utc::now(),
            actual: Some(msg),
            expected: Some(step.clone()),
            not: step.not,
            err: None,
            scripting_memory: memory.clone(),
        });
        Ok(())
    }

    /// Evaluate the implicit text expectation plus the step's asserters.
    /// With aggregation enabled every assertion failure is collected and
    /// merged into one composite error; otherwise the first one aborts.
    async fn evaluate_bot_step(
        &self,
        convo: &Convo,
        step: &ConvoStep,
        msg: &BotMessage,
        memory: &ScriptingMemory,
        container: &Container,
    ) -> Result<(), EngineError> {
        let queue_length = container.queue_length().await;
        let aggregate = self.caps.assertion.aggregate_errors;
        let mut failures: Vec<AssertionFailure> = Vec::new();

        if let Some(raw) = step.message_text.as_deref().filter(|text| !text.is_empty()) {
            match self.check_expected_text(step, raw, msg, memory) {
                Ok(()) => {}
                Err(EngineError::Assertion(cause)) if aggregate => failures.push(cause),
                Err(err) => return Err(err),
            }
        }

        for asserter in self.registry.asserters_for_step(step)? {
            let args =
                scripting_memory::apply_to_args(&self.caps, memory, Some(msg), &asserter.args)?;
            let ctx = AsserterContext {
                convo_name: &convo.header.name,
                step_tag: &step.step_tag,
                args,
                not: step.not,
                bot_msg: Some(msg),
                scripting_memory: memory,
                utterances: Some(&self.utterances),
                queue_length,
                is_global: asserter.is_global,
            };
            match asserter.plugin.assert_step(&ctx).await {
                Ok(()) => {}
                Err(EngineError::Assertion(cause)) if aggregate => failures.push(cause),
                Err(err) => return Err(err),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::composite(failures))
        }
    }

    /// The implicit expected-text check of a bot step, honoring the
    /// configured matching mode, utterance alternatives and negation
    fn check_expected_text(
        &self,
        step: &ConvoStep,
        raw: &str,
        msg: &BotMessage,
        memory: &ScriptingMemory,
    ) -> Result<(), EngineError> {
        let alternatives: Vec<String> = match self.utterances.get(raw) {
            Some(utterance) => utterance.alternatives.clone(),
            None => vec![raw.to_string()],
        };
        let fragments = msg.text_fragments();
        let mode = self.caps.scripting.matching_mode;

        let mut matched = false;
        'alternatives: for alternative in &alternatives {
            let expected = scripting_memory::apply(&self.caps, memory, Some(msg), alternative)?;
            for fragment in &fragments {
                let hit = matching::matches(mode, fragment, &expected).map_err(|e| {
                    EngineError::Configuration {
                        step_tag: step.step_tag.clone(),
                        source: TEXT_MATCH.to_string(),
                        message: format!("invalid pattern \"{}\": {}", expected, e),
                    }
                })?;
                if hit {
                    matched = true;
                    break 'alternatives;
                }
            }
        }

        let actual = fragments.join(" ");
        match (matched, step.not) {
            (true, false) | (false, true) => Ok(()),
            (false, false) => Err(EngineError::Assertion(
                AssertionFailure::new(
                    TEXT_MATCH,
                    &step.step_tag,
                    false,
                    format!("Expected bot text \"{}\" to match \"{}\"", actual, raw),
                )
                .with_expected(json!(alternatives))
                .with_actual(json!(actual)),
            )),
            (true, true) => Err(EngineError::Assertion(
                AssertionFailure::new(
                    TEXT_MATCH,
                    &step.step_tag,
                    true,
                    format!("Expected bot text \"{}\" NOT to match \"{}\"", actual, raw),
                )
                .with_expected(json!(alternatives))
                .with_actual(json!(actual)),
            )),
        }
    }

    /// Convo begin/end assertions: every asserter referenced anywhere in the
    /// convo plus the globals, each invoked once
    async fn assert_boundary(
        &self,
        convo: &Convo,
        container: &Container,
        memory: &ScriptingMemory,
        begin: bool,
    ) -> Result<(), EngineError> {
        let asserters = self.boundary_asserters(convo)?;
        if asserters.is_empty() {
            return Ok(());
        }

        let queue_length = container.queue_length().await;
        let aggregate = self.caps.assertion.aggregate_errors;
        let step_tag = if begin { "convo begin" } else { "convo end" };
        let mut failures: Vec<AssertionFailure> = Vec::new();

        for asserter in asserters {
            let args = scripting_memory::apply_to_args(&self.caps, memory, None, &asserter.args)?;
            let ctx = AsserterContext {
                convo_name: &convo.header.name,
                step_tag,
                args,
                not: false,
                bot_msg: None,
                scripting_memory: memory,
                utterances: Some(&self.utterances),
                queue_length,
                is_global: asserter.is_global,
            };
            let result = if begin {
                asserter.plugin.assert_convo_begin(&ctx).await
            } else {
                asserter.plugin.assert_convo_end(&ctx).await
            };
            match result {
                Ok(()) => {}
                Err(EngineError::Assertion(cause)) if aggregate => failures.push(cause),
                Err(err) => return Err(err),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::composite(failures))
        }
    }

    fn boundary_asserters(&self, convo: &Convo) -> Result<Vec<ResolvedAsserter>, EngineError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for step in &convo.conversation {
            for reference in &step.asserters {
                if !seen.insert(reference.name.clone()) {
                    continue;
                }
                let plugin = self.registry.asserter(&reference.name).ok_or_else(|| {
                    EngineError::Compile(format!(
                        "{}: asserter \"{}\" is not registered",
                        step.step_tag, reference.name
                    ))
                })?;
                out.push(ResolvedAsserter {
                    name: reference.name.clone(),
                    plugin,
                    args: reference.args.clone(),
                    is_global: false,
                });
            }
        }
        for global in self.registry.global_asserters() {
            if seen.insert(global.name.clone()) {
                out.push(global);
            }
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_hook_phase(
        &self,
        phase: HookPhase,
        hooks: &[ResolvedHook],
        convo_name: &str,
        step_run: &mut ConvoStep,
        memory: &mut ScriptingMemory,
        mut me_msg: Option<&mut BotMessage>,
        bot_msg: Option<&BotMessage>,
        queue: &Arc<ReplyQueue>,
        wait_override: &mut Option<u64>,
    ) -> Result<(), EngineError> {
        for hook in hooks {
            // Hook args carry variable NAMES (SET_SCRIPTING_MEMORY $name|...),
            // so they are passed verbatim; each hook resolves what it needs
            let args = hook.args.clone();
            let mut ctx = HookContext {
                convo_name,
                convo_step: step_run,
                args,
                me_msg: me_msg.as_deref_mut(),
                bot_msg,
                scripting_memory: memory,
                reply_queue: Some(Arc::clone(queue)),
                is_global: hook.is_global,
                wait_timeout_override_ms: *wait_override,
            };
            match phase {
                HookPhase::ConvoBegin => hook.plugin.on_convo_begin(&mut ctx).await?,
                HookPhase::MeStart => hook.plugin.on_me_start(&mut ctx).await?,
                HookPhase::MeEnd => hook.plugin.on_me_end(&mut ctx).await?,
                HookPhase::BotStart => hook.plugin.on_bot_start(&mut ctx).await?,
                HookPhase::BotPrepare => hook.plugin.on_bot_prepare(&mut ctx).await?,
                HookPhase::BotEnd => hook.plugin.on_bot_end(&mut ctx).await?,
                HookPhase::ConvoEnd => hook.plugin.on_convo_end(&mut ctx).await?,
            }
            *wait_override = ctx.wait_timeout_override_ms;
        }
        Ok(())
    }
}

fn skipped_entry(
    step: &ConvoStep,
    step_begin: chrono::DateTime<Utc>,
    memory: &ScriptingMemory,
) -> TranscriptStep {
    TranscriptStep {
        step_begin,
        step_end: Utc::now(),
        actual: None,
        expected: Some(step.clone()),
        not: step.not,
        err: None,
        scripting_memory: memory.clone(),
    }
}

fn convo_references_asserter(convo: &Convo, registry: &PluginRegistry, name: &str) -> bool {
    convo
        .conversation
        .iter()
        .any(|step| step.asserters.iter().any(|reference| reference.name == name))
        || registry
            .global_asserters()
            .iter()
            .any(|asserter| asserter.name == name)
}
