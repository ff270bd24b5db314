//! Script compiler and partial-convo resolution
//!
//! The compiler turns script buffers into the canonical convo model and back:
//!
//! - [`Compiler::compile`] parses one buffer in a [`ScriptFormat`] into a
//!   [`CompileResult`] of convos, partial convos, utterance lists and
//!   scripting memory definitions
//! - [`Compiler::decompile`] renders convos back into a script buffer
//! - [`Compiler::expand_convos`] resolves INCLUDE references (with cycle
//!   detection), marks condition group ends, expands utterance references
//!   into convo variants and applies scripting memory definitions
//!
//! Step bodies compile line by line: a first token matching a registered
//! plugin name becomes a [`StepRef`] with `|`-separated arguments, a JSON
//! object becomes `source_data`, anything else is free text. Text lines
//! honor the `?` (optional) and `!` (negation) prefixes, doubled for a
//! literal leading `?`/`!`.

pub mod json;
pub mod txt;

use crate::config::Caps;
use crate::dispatch::{PluginKind, PluginRegistry};
use sdk::errors::EngineError;
use sdk::types::{Conditional, Convo, ConvoStep, PartialConvo, ScriptingMemory, StepRef, Utterance};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name of the logic hook that splices a partial convo into a step sequence
pub const INCLUDE_HOOK: &str = "INCLUDE";

/// Name of the logic hook that gates a condition group member
pub const CONDITION_HOOK: &str = "CONDITION_SCRIPTING_MEMORY";

/// Script serialization formats with an in-tree parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFormat {
    Txt,
    Json,
}

/// What a script buffer contains; only meaningful for formats that do not
/// self-describe (TXT)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    Convo,
    PartialConvo,
    Utterances,
    ScriptingMemory,
}

/// One scripting memory definition case: a name plus the variable values it
/// seeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptingMemoryDefinition {
    pub name: String,
    pub values: ScriptingMemory,
}

/// Everything one or more compile calls produced
#[derive(Debug, Default)]
pub struct CompileResult {
    pub convos: Vec<Convo>,
    pub partial_convos: HashMap<String, PartialConvo>,
    pub utterances: HashMap<String, Utterance>,
    pub scripting_memories: Vec<ScriptingMemoryDefinition>,
}

impl CompileResult {
    /// Merge another compile result into this one. Duplicate partial convo
    /// or utterance names are compile errors.
    pub fn merge(&mut self, other: CompileResult) -> Result<(), EngineError> {
        self.convos.extend(other.convos);
        for (name, partial) in other.partial_convos {
            if self.partial_convos.contains_key(&name) {
                return Err(EngineError::Compile(format!(
                    "duplicate partial convo name \"{}\"",
                    name
                )));
            }
            self.partial_convos.insert(name, partial);
        }
        for (name, utterance) in other.utterances {
            if self.utterances.contains_key(&name) {
                return Err(EngineError::Compile(format!(
                    "duplicate utterance list name \"{}\"",
                    name
                )));
            }
            self.utterances.insert(name, utterance);
        }
        self.scripting_memories.extend(other.scripting_memories);
        Ok(())
    }
}

/// The script compiler
///
/// Holds the capability set (for expansion behavior), the plugin registry
/// (for first-token name recognition) and the EOL marker used to join
/// multi-line step text.
pub struct Compiler {
    caps: Caps,
    registry: Arc<PluginRegistry>,
    eol: Option<String>,
}

impl Compiler {
    pub fn new(caps: Caps, registry: Arc<PluginRegistry>) -> Self {
        Self {
            caps,
            registry,
            eol: Some("\n".to_string()),
        }
    }

    /// Override the EOL marker joining multi-line step text. `None` makes
    /// multi-line text a compile error.
    pub fn with_eol(mut self, eol: Option<String>) -> Self {
        self.eol = eol;
        self
    }

    /// Parse one script buffer
    pub fn compile(
        &self,
        buffer: &str,
        format: ScriptFormat,
        script_type: ScriptType,
    ) -> Result<CompileResult, EngineError> {
        match format {
            ScriptFormat::Txt => txt::parse(self, buffer, script_type),
            ScriptFormat::Json => json::parse(buffer),
        }
    }

    /// Render convos back into a script buffer
    pub fn decompile(&self, convos: &[Convo], format: ScriptFormat) -> Result<String, EngineError> {
        match format {
            ScriptFormat::Txt => Ok(txt::serialize(convos)),
            ScriptFormat::Json => json::serialize(convos),
        }
    }

    /// Full expansion: partial convo resolution, condition group end
    /// marking, utterance variants, scripting memory variants
    pub fn expand_convos(&self, result: &mut CompileResult) -> Result<(), EngineError> {
        self.expand_partial_convos(result)?;
        for convo in &mut result.convos {
            mark_condition_group_ends(convo);
        }
        self.expand_utterances_to_convos(result);
        self.expand_scripting_memory_to_convos(result);
        Ok(())
    }

    /// Resolve every INCLUDE reference by splicing the named partial convo's
    /// steps in place, depth-first, failing on unknown names and cycles
    pub fn expand_partial_convos(&self, result: &mut CompileResult) -> Result<(), EngineError> {
        if result.partial_convos.is_empty()
            && !result.convos.iter().any(convo_has_includes)
        {
            return Ok(());
        }
        let partials = result.partial_convos.clone();
        for convo in &mut result.convos {
            let mut stack: Vec<String> = Vec::new();
            convo.conversation = resolve_steps(&convo.conversation, &partials, &mut stack)?;
        }
        Ok(())
    }

    /// Expand me-step utterance references into one convo variant per
    /// alternative (cross product over all referencing steps)
    pub fn expand_utterances_to_convos(&self, result: &mut CompileResult) {
        if result.utterances.is_empty() {
            return;
        }
        let utterances = std::mem::take(&mut result.utterances);
        let convos = std::mem::take(&mut result.convos);
        for convo in convos {
            result.convos.extend(self.expand_one_convo(convo, &utterances));
        }
        result.utterances = utterances;
    }

    fn expand_one_convo(
        &self,
        convo: Convo,
        utterances: &HashMap<String, Utterance>,
    ) -> Vec<Convo> {
        let referencing: Vec<usize> = convo
            .conversation
            .iter()
            .enumerate()
            .filter(|(_, step)| {
                step.sender == sdk::types::Sender::Me
                    && step
                        .message_text
                        .as_deref()
                        .map(|text| utterances.contains_key(text))
                        .unwrap_or(false)
            })
            .map(|(index, _)| index)
            .collect();

        if referencing.is_empty() {
            return vec![convo];
        }

        let mut variants = vec![convo];
        for index in referencing {
            let mut next = Vec::new();
            for variant in variants {
                let name = match variant.conversation[index].message_text.as_deref() {
                    Some(name) => name.to_string(),
                    None => {
                        next.push(variant);
                        continue;
                    }
                };
                let utterance = match utterances.get(&name) {
                    Some(utterance) => utterance,
                    None => {
                        next.push(variant);
                        continue;
                    }
                };
                for (position, alternative) in utterance.alternatives.iter().enumerate() {
                    let mut expanded = variant.clone();
                    expanded.conversation[index].message_text = Some(alternative.clone());
                    expanded.header.name =
                        format!("{}/{}-L{}", expanded.header.name, name, position + 1);
                    if self.caps.scripting.enable_memory {
                        expanded
                            .scripting_memory
                            .insert(format!("${}", name), alternative.clone());
                    }
                    next.push(expanded);
                }
            }
            variants = next;
        }
        debug!("utterance expansion produced {} convo variant(s)", variants.len());
        variants
    }

    /// Produce one convo variant per scripting memory definition referencing
    /// it; convos touching no definition pass through unchanged. Requires
    /// scripting memory to be enabled.
    pub fn expand_scripting_memory_to_convos(&self, result: &mut CompileResult) {
        if !self.caps.scripting.enable_memory || result.scripting_memories.is_empty() {
            return;
        }
        let convos = std::mem::take(&mut result.convos);
        for convo in convos {
            let matching: Vec<&ScriptingMemoryDefinition> = result
                .scripting_memories
                .iter()
                .filter(|definition| convo_references_memory(&convo, definition))
                .collect();
            if matching.is_empty() {
                result.convos.push(convo);
                continue;
            }
            for definition in matching {
                let mut variant = convo.clone();
                variant.header.name = format!("{}.{}", variant.header.name, definition.name);
                variant.scripting_memory.extend(
                    definition
                        .values
                        .iter()
                        .map(|(key, value)| (key.clone(), value.clone())),
                );
                result.convos.push(variant);
            }
        }
    }

    /// Compile the raw body lines of one step into its canonical form
    pub(crate) fn compile_step_body(
        &self,
        step: &mut ConvoStep,
        lines: &[&str],
    ) -> Result<(), EngineError> {
        let mut text_lines: Vec<String> = Vec::new();
        for raw in lines {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('{') {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
                    if value.is_object() {
                        step.source_data = Some(value);
                        continue;
                    }
                }
            }

            let first = line.split_whitespace().next().unwrap_or("");
            if let Some(kind) = self.registry.recognize_for(first, step.sender) {
                let rest = line[first.len()..].trim();
                let reference = StepRef::new(first, split_args(rest));
                if reference.name == CONDITION_HOOK {
                    let group_id = reference.args.first().cloned().ok_or_else(|| {
                        EngineError::Compile(format!(
                            "{}: {} requires a condition group id argument",
                            step.step_tag, CONDITION_HOOK
                        ))
                    })?;
                    step.conditional = Some(Conditional {
                        condition_group_id: group_id,
                        condition_group_end: false,
                        skip: false,
                    });
                }
                match kind {
                    PluginKind::Asserter => step.asserters.push(reference),
                    PluginKind::LogicHook => step.logic_hooks.push(reference),
                    PluginKind::UserInput => step.user_inputs.push(reference),
                }
                continue;
            }

            text_lines.push(self.compile_text_line(step, line));
        }

        match text_lines.len() {
            0 => {}
            1 => step.message_text = text_lines.pop(),
            count => {
                let eol = self.eol.as_deref().ok_or_else(|| {
                    EngineError::Compile(format!(
                        "{}: step has {} text lines but no EOL marker is configured",
                        step.step_tag, count
                    ))
                })?;
                step.message_text = Some(text_lines.join(eol));
            }
        }
        Ok(())
    }

    /// Strip the `?`/`!` modifier prefixes off a text line, recording them on
    /// the step. Doubling escapes a literal leading marker.
    fn compile_text_line(&self, step: &mut ConvoStep, line: &str) -> String {
        let mut text = line;
        if let Some(stripped) = text.strip_prefix("??") {
            return format!("?{}", stripped);
        }
        if let Some(stripped) = text.strip_prefix('?') {
            step.optional = true;
            text = stripped.trim_start();
        }
        if let Some(stripped) = text.strip_prefix("!!") {
            return format!("!{}", stripped);
        }
        if let Some(stripped) = text.strip_prefix('!') {
            step.not = true;
            text = stripped.trim_start();
        }
        text.to_string()
    }
}

/// Split a plugin argument string on `|`, trimming each argument
pub(crate) fn split_args(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split('|').map(|arg| arg.trim().to_string()).collect()
}

fn convo_has_includes(convo: &Convo) -> bool {
    convo
        .conversation
        .iter()
        .any(|step| step.logic_hooks.iter().any(|hook| hook.name == INCLUDE_HOOK))
}

fn convo_references_memory(convo: &Convo, definition: &ScriptingMemoryDefinition) -> bool {
    let mentions = |text: &str| definition.values.keys().any(|key| text.contains(key.as_str()));
    convo.conversation.iter().any(|step| {
        step.message_text.as_deref().map(mentions).unwrap_or(false)
            || step
                .asserters
                .iter()
                .chain(&step.logic_hooks)
                .chain(&step.user_inputs)
                .any(|reference| reference.args.iter().any(|arg| mentions(arg)))
    })
}

/// A conditional step is its group's end when the next conditional step
/// belongs to a different group or there is none. Groups are contiguous.
fn mark_condition_group_ends(convo: &mut Convo) {
    let count = convo.conversation.len();
    for index in 0..count {
        let group_id = match &convo.conversation[index].conditional {
            Some(conditional) => conditional.condition_group_id.clone(),
            None => continue,
        };
        let is_end = convo.conversation[index + 1..]
            .iter()
            .find_map(|step| step.conditional.as_ref())
            .map(|next| next.condition_group_id != group_id)
            .unwrap_or(true);
        if let Some(conditional) = &mut convo.conversation[index].conditional {
            conditional.condition_group_end = is_end;
        }
    }
}

fn resolve_steps(
    steps: &[ConvoStep],
    partials: &HashMap<String, PartialConvo>,
    stack: &mut Vec<String>,
) -> Result<Vec<ConvoStep>, EngineError> {
    let mut out = Vec::new();
    for step in steps {
        let includes: Vec<StepRef> = step
            .logic_hooks
            .iter()
            .filter(|hook| hook.name == INCLUDE_HOOK)
            .cloned()
            .collect();
        if includes.is_empty() {
            out.push(step.clone());
            continue;
        }

        let mut remaining = step.clone();
        remaining.logic_hooks.retain(|hook| hook.name != INCLUDE_HOOK);

        for include in includes {
            let name = include.args.first().cloned().unwrap_or_default();
            if name.is_empty() {
                return Err(EngineError::Compile(format!(
                    "{}: INCLUDE requires a partial convo name",
                    step.step_tag
                )));
            }
            if let Some(position) = stack.iter().position(|entry| entry == &name) {
                return Err(EngineError::Compile(format!(
                    "Cycle found in partial convos: \"{}\" is referenced by \"{}\" and by \"{}\"",
                    name,
                    render_path(&stack[..position]),
                    render_path(stack)
                )));
            }
            let partial = partials.get(&name).ok_or_else(|| unknown_partial(&name, partials))?;
            stack.push(name);
            let resolved = resolve_steps(&partial.steps, partials, stack)?;
            stack.pop();
            out.extend(resolved);
        }

        if !remaining.is_empty() {
            out.push(remaining);
        }
    }
    Ok(out)
}

fn render_path(names: &[String]) -> String {
    if names.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", names.join("/"))
    }
}

fn unknown_partial(name: &str, partials: &HashMap<String, PartialConvo>) -> EngineError {
    if partials.is_empty() {
        EngineError::Compile(format!(
            "partial convo \"{}\" not found; no partial convos are defined",
            name
        ))
    } else {
        let mut available: Vec<&str> = partials.keys().map(String::as_str).collect();
        available.sort_unstable();
        EngineError::Compile(format!(
            "partial convo \"{}\" not found; available partial convos: {}",
            name,
            available.join(", ")
        ))
    }
}

/// Reject a partial convo name carrying the argument delimiter
pub(crate) fn check_partial_name(name: &str) -> Result<(), EngineError> {
    if name.contains('|') {
        return Err(EngineError::Compile(format!(
            "partial convo name \"{}\" contains the argument delimiter '|'",
            name
        )));
    }
    Ok(())
}
