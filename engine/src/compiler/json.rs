//! JSON script format
//!
//! A self-describing document carrying convos, partial convos, utterance
//! lists and scripting memory definitions in one buffer. Field names are
//! camelCase; every collection is optional.
//!
//! ```json
//! {
//!   "convos": [{
//!     "name": "my first convo",
//!     "steps": [
//!       { "sender": "me", "messageText": "hello bot" },
//!       { "sender": "bot", "messageText": "hello user",
//!         "asserters": [{ "name": "BUTTONS", "args": ["2"] }] }
//!     ]
//!   }],
//!   "utterances": [{ "name": "GREETING", "utterances": ["hi", "hello"] }]
//! }
//! ```

use super::{check_partial_name, CompileResult, ScriptingMemoryDefinition};
use sdk::errors::EngineError;
use sdk::types::{
    Conditional, Convo, ConvoHeader, ConvoStep, PartialConvo, ScriptingMemory, Sender, StepRef,
    Utterance,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsonScript {
    convos: Vec<JsonConvo>,
    partial_convos: Vec<JsonConvo>,
    utterances: Vec<JsonUtterance>,
    scripting_memories: Vec<JsonScriptingMemory>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonConvo {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    steps: Vec<JsonStep>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonStep {
    sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    not: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    optional: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    asserters: Vec<StepRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    logic_hooks: Vec<StepRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    user_inputs: Vec<StepRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conditional: Option<Conditional>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonUtterance {
    name: String,
    utterances: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonScriptingMemory {
    name: String,
    values: ScriptingMemory,
}

pub(super) fn parse(buffer: &str) -> Result<CompileResult, EngineError> {
    let script: JsonScript = serde_json::from_str(buffer)
        .map_err(|e| EngineError::Compile(format!("invalid JSON script: {}", e)))?;

    let mut result = CompileResult::default();
    for convo in script.convos {
        result.convos.push(into_convo(convo));
    }
    for partial in script.partial_convos {
        check_partial_name(&partial.name)?;
        if result.partial_convos.contains_key(&partial.name) {
            return Err(EngineError::Compile(format!(
                "duplicate partial convo name \"{}\"",
                partial.name
            )));
        }
        let name = partial.name.clone();
        let steps = into_steps(&name, partial.steps);
        result.partial_convos.insert(name.clone(), PartialConvo { name, steps });
    }
    for utterance in script.utterances {
        if result.utterances.contains_key(&utterance.name) {
            return Err(EngineError::Compile(format!(
                "duplicate utterance list name \"{}\"",
                utterance.name
            )));
        }
        result.utterances.insert(
            utterance.name.clone(),
            Utterance {
                name: utterance.name,
                alternatives: utterance.utterances,
            },
        );
    }
    for memory in script.scripting_memories {
        result.scripting_memories.push(ScriptingMemoryDefinition {
            name: memory.name,
            values: memory.values,
        });
    }
    Ok(result)
}

fn into_convo(convo: JsonConvo) -> Convo {
    let name = convo.name;
    let steps = into_steps(&name, convo.steps);
    Convo {
        header: ConvoHeader {
            name,
            description: convo.description,
        },
        conversation: steps,
        scripting_memory: ScriptingMemory::new(),
    }
}

fn into_steps(owner: &str, steps: Vec<JsonStep>) -> Vec<ConvoStep> {
    steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            // Derive the conditional from the gating hook when the document
            // does not carry it explicitly
            let conditional = step.conditional.or_else(|| {
                step.logic_hooks
                    .iter()
                    .find(|hook| hook.name == super::CONDITION_HOOK)
                    .and_then(|hook| hook.args.first())
                    .map(|group_id| Conditional {
                        condition_group_id: group_id.clone(),
                        condition_group_end: false,
                        skip: false,
                    })
            });
            ConvoStep {
                sender: step.sender,
                message_text: step.message_text,
                source_data: step.source_data,
                not: step.not,
                optional: step.optional,
                step_tag: format!("{}/Step {}", owner, index + 1),
                asserters: step.asserters,
                logic_hooks: step.logic_hooks,
                user_inputs: step.user_inputs,
                conditional,
            }
        })
        .collect()
}

/// Render convos as a self-describing JSON document
pub(super) fn serialize(convos: &[Convo]) -> Result<String, EngineError> {
    let script = JsonScript {
        convos: convos
            .iter()
            .map(|convo| JsonConvo {
                name: convo.header.name.clone(),
                description: convo.header.description.clone(),
                steps: convo
                    .conversation
                    .iter()
                    .map(|step| JsonStep {
                        sender: step.sender,
                        message_text: step.message_text.clone(),
                        source_data: step.source_data.clone(),
                        not: step.not,
                        optional: step.optional,
                        asserters: step.asserters.clone(),
                        logic_hooks: step.logic_hooks.clone(),
                        user_inputs: step.user_inputs.clone(),
                        conditional: step.conditional.clone(),
                    })
                    .collect(),
            })
            .collect(),
        ..Default::default()
    };
    serde_json::to_string_pretty(&script)
        .map_err(|e| EngineError::Compile(format!("JSON serialization failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, ScriptFormat, ScriptType};
    use crate::config::Caps;
    use crate::dispatch::PluginRegistry;
    use std::sync::Arc;

    fn compiler() -> Compiler {
        Compiler::new(Caps::default(), Arc::new(PluginRegistry::with_builtins()))
    }

    const BASIC: &str = r#"{
        "convos": [{
            "name": "my first convo",
            "description": "a short description",
            "steps": [
                { "sender": "me", "messageText": "hello bot" },
                { "sender": "bot", "messageText": "hello user",
                  "asserters": [{ "name": "BUTTONS", "args": ["2"] }] }
            ]
        }],
        "utterances": [{ "name": "GREETING", "utterances": ["hi", "hello"] }]
    }"#;

    #[test]
    fn test_parse_basic_document() {
        let result = compiler()
            .compile(BASIC, ScriptFormat::Json, ScriptType::Convo)
            .unwrap();

        assert_eq!(result.convos.len(), 1);
        let convo = &result.convos[0];
        assert_eq!(convo.header.name, "my first convo");
        assert_eq!(convo.conversation.len(), 2);
        assert_eq!(convo.conversation[1].asserters[0].name, "BUTTONS");
        assert_eq!(convo.conversation[0].step_tag, "my first convo/Step 1");

        assert_eq!(result.utterances.get("GREETING").unwrap().alternatives.len(), 2);
    }

    #[test]
    fn test_parse_invalid_json_fails() {
        let err = compiler()
            .compile("{ nope", ScriptFormat::Json, ScriptType::Convo)
            .unwrap_err();
        assert!(err.to_string().contains("invalid JSON script"));
    }

    #[test]
    fn test_parse_duplicate_partial_fails() {
        let script = r#"{
            "partialConvos": [
                { "name": "p", "steps": [] },
                { "name": "p", "steps": [] }
            ]
        }"#;
        let err = compiler()
            .compile(script, ScriptFormat::Json, ScriptType::Convo)
            .unwrap_err();
        assert!(err.to_string().contains("duplicate partial convo name"));
    }

    #[test]
    fn test_conditional_derived_from_hook() {
        let script = r#"{
            "convos": [{
                "name": "c",
                "steps": [{
                    "sender": "bot",
                    "logicHooks": [{ "name": "CONDITION_SCRIPTING_MEMORY",
                                     "args": ["grp1", "$choice", "yes"] }]
                }]
            }]
        }"#;
        let result = compiler()
            .compile(script, ScriptFormat::Json, ScriptType::Convo)
            .unwrap();
        let conditional = result.convos[0].conversation[0]
            .conditional
            .as_ref()
            .unwrap();
        assert_eq!(conditional.condition_group_id, "grp1");
    }

    #[test]
    fn test_json_round_trip() {
        let compiler = compiler();
        let first = compiler
            .compile(BASIC, ScriptFormat::Json, ScriptType::Convo)
            .unwrap();
        let rendered = compiler
            .decompile(&first.convos, ScriptFormat::Json)
            .unwrap();
        let second = compiler
            .compile(&rendered, ScriptFormat::Json, ScriptType::Convo)
            .unwrap();

        let (a, b) = (&first.convos[0], &second.convos[0]);
        assert_eq!(a.header.name, b.header.name);
        assert_eq!(a.conversation.len(), b.conversation.len());
        for (left, right) in a.conversation.iter().zip(&b.conversation) {
            assert_eq!(left.sender, right.sender);
            assert_eq!(left.message_text, right.message_text);
            assert_eq!(left.asserters, right.asserters);
        }
    }
}
