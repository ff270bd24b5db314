//! TXT script format
//!
//! The textual format is line-oriented: a header (name, optional
//! description) followed by `#me` / `#bot` sections. Each section body line
//! is either free text, a plugin reference (first token matches a registered
//! name, arguments `|`-separated) or an inline JSON object.
//!
//! ```text
//! my first convo
//! an optional description
//!
//! #me
//! hello bot
//!
//! #bot
//! hello user
//! BUTTONS 2
//! ```
//!
//! Utterance lists are a name line followed by one alternative per line.
//! Scripting memory files are a case-name line followed by `$name|value`
//! lines.

use super::{check_partial_name, CompileResult, Compiler, ScriptType, ScriptingMemoryDefinition};
use sdk::errors::EngineError;
use sdk::types::{Convo, ConvoHeader, ConvoStep, PartialConvo, ScriptingMemory, Sender, Utterance};

pub(super) fn parse(
    compiler: &Compiler,
    buffer: &str,
    script_type: ScriptType,
) -> Result<CompileResult, EngineError> {
    match script_type {
        ScriptType::Convo => parse_convo(compiler, buffer, false),
        ScriptType::PartialConvo => parse_convo(compiler, buffer, true),
        ScriptType::Utterances => parse_utterances(buffer),
        ScriptType::ScriptingMemory => parse_scripting_memory(buffer),
    }
}

fn parse_convo(
    compiler: &Compiler,
    buffer: &str,
    is_partial: bool,
) -> Result<CompileResult, EngineError> {
    let mut name: Option<String> = None;
    let mut description_lines: Vec<&str> = Vec::new();
    let mut sections: Vec<(Sender, usize, Vec<&str>)> = Vec::new();

    for (index, raw) in buffer.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if let Some(sender) = section_marker(line, line_no)? {
            sections.push((sender, line_no, Vec::new()));
            continue;
        }
        match sections.last_mut() {
            Some((_, _, body)) => body.push(raw),
            None => {
                if line.is_empty() {
                    continue;
                }
                if name.is_none() {
                    name = Some(line.to_string());
                } else {
                    description_lines.push(line);
                }
            }
        }
    }

    let name = name.ok_or_else(|| EngineError::Compile("script has no name line".to_string()))?;
    let description = if description_lines.is_empty() {
        None
    } else {
        Some(description_lines.join("\n"))
    };

    let mut steps = Vec::with_capacity(sections.len());
    for (sender, line_no, body) in sections {
        let mut step = ConvoStep::new(sender, format!("Line {}", line_no));
        compiler.compile_step_body(&mut step, &body)?;
        steps.push(step);
    }

    let mut result = CompileResult::default();
    if is_partial {
        check_partial_name(&name)?;
        result
            .partial_convos
            .insert(name.clone(), PartialConvo { name, steps });
    } else {
        result.convos.push(Convo {
            header: ConvoHeader { name, description },
            conversation: steps,
            scripting_memory: ScriptingMemory::new(),
        });
    }
    Ok(result)
}

fn section_marker(line: &str, line_no: usize) -> Result<Option<Sender>, EngineError> {
    if !line.starts_with('#') {
        return Ok(None);
    }
    match line {
        "#me" => Ok(Some(Sender::Me)),
        "#bot" => Ok(Some(Sender::Bot)),
        other => Err(EngineError::Compile(format!(
            "Line {}: unknown section marker \"{}\"",
            line_no, other
        ))),
    }
}

fn parse_utterances(buffer: &str) -> Result<CompileResult, EngineError> {
    let mut lines = buffer.lines().map(str::trim).filter(|line| !line.is_empty());
    let name = lines
        .next()
        .ok_or_else(|| EngineError::Compile("utterance list has no name line".to_string()))?
        .to_string();
    let alternatives: Vec<String> = lines.map(String::from).collect();
    if alternatives.is_empty() {
        return Err(EngineError::Compile(format!(
            "utterance list \"{}\" has no alternatives",
            name
        )));
    }

    let mut result = CompileResult::default();
    result
        .utterances
        .insert(name.clone(), Utterance { name, alternatives });
    Ok(result)
}

fn parse_scripting_memory(buffer: &str) -> Result<CompileResult, EngineError> {
    let mut name: Option<String> = None;
    let mut values = ScriptingMemory::new();

    for (index, raw) in buffer.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match name {
            None => name = Some(line.to_string()),
            Some(_) => {
                let (key, value) = line.split_once('|').ok_or_else(|| {
                    EngineError::Compile(format!(
                        "Line {}: scripting memory line must be \"$name|value\"",
                        index + 1
                    ))
                })?;
                let key = key.trim();
                if !key.starts_with('$') {
                    return Err(EngineError::Compile(format!(
                        "Line {}: scripting memory variable \"{}\" must start with '$'",
                        index + 1,
                        key
                    )));
                }
                values.insert(key.to_string(), value.trim().to_string());
            }
        }
    }

    let name = name
        .ok_or_else(|| EngineError::Compile("scripting memory file has no name line".to_string()))?;
    let mut result = CompileResult::default();
    result
        .scripting_memories
        .push(ScriptingMemoryDefinition { name, values });
    Ok(result)
}

/// Render convos back into the textual format
pub(super) fn serialize(convos: &[Convo]) -> String {
    let mut out = String::new();
    for (index, convo) in convos.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        out.push_str(&convo.header.name);
        out.push('\n');
        if let Some(ref description) = convo.header.description {
            out.push_str(description);
            out.push('\n');
        }
        for step in &convo.conversation {
            out.push('\n');
            out.push_str(step.sender.marker());
            out.push('\n');
            serialize_step_body(&mut out, step);
        }
    }
    out
}

fn serialize_step_body(out: &mut String, step: &ConvoStep) {
    if let Some(ref text) = step.message_text {
        for (index, line) in text.split('\n').enumerate() {
            if index == 0 {
                out.push_str(&render_text_line(line, step.optional, step.not));
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }
    }
    if let Some(ref source_data) = step.source_data {
        out.push_str(&source_data.to_string());
        out.push('\n');
    }
    for reference in step
        .user_inputs
        .iter()
        .chain(&step.asserters)
        .chain(&step.logic_hooks)
    {
        out.push_str(&reference.name);
        if !reference.args.is_empty() {
            out.push(' ');
            out.push_str(&reference.args.join("|"));
        }
        out.push('\n');
    }
}

fn render_text_line(line: &str, optional: bool, not: bool) -> String {
    let escaped = if line.starts_with('?') {
        format!("?{}", line)
    } else if line.starts_with('!') {
        format!("!{}", line)
    } else {
        line.to_string()
    };
    format!(
        "{}{}{}",
        if optional { "?" } else { "" },
        if not { "!" } else { "" },
        escaped
    )
}
