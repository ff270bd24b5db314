//! Scripting memory substitution/extraction engine
//!
//! Scripting memory maps `$name` tokens to string values, scoped to one
//! convo run. [`apply`] substitutes built-in function tokens and user
//! variables into outgoing text and plugin arguments; [`fill`] derives new
//! memory entries by pattern-matching the bot's actual text against the
//! expected utterance.
//!
//! Substitution order is longest-token-first across the union of built-in
//! names and memory keys, so `$years` is never partially matched by a
//! substring search for `$year`. There is no escaping syntax for a literal
//! `$`; precedence is resolved by token length only.
//!
//! The built-in function table is immutable and resolved once at startup.
//! A `fill()` capture whose name collides with a built-in is silently
//! skipped and logged; a memory entry that was set anyway (impossible via
//! `fill`) would override the built-in, matching the table lookup order.

use crate::config::{Caps, FillMode};
use chrono::{Local, Utc};
use regex::Regex;
use sdk::errors::EngineError;
use sdk::types::{BotMessage, ScriptingMemory, Utterance};
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Whether a built-in takes a parenthesized argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgSpec {
    None,
    Optional,
    Required,
}

/// Evaluation environment for built-in functions
struct ApplyEnv<'a> {
    caps: &'a Caps,
    bot_msg: Option<&'a BotMessage>,
}

/// One entry of the immutable built-in function table
struct Builtin {
    /// Function name without the leading `$`
    name: &'static str,
    arg: ArgSpec,
    /// Arbitrary environment access; requires the allow_unsafe switch
    unsafe_fn: bool,
    eval: fn(&ApplyEnv<'_>, Option<&str>) -> Result<String, EngineError>,
}

/// The reserved-word table. Order is irrelevant; substitution sorts the
/// union of builtins and memory keys by token length.
static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "now_ISO",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| Ok(Utc::now().to_rfc3339()),
    },
    Builtin {
        name: "now_EN",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%m/%d/%Y, %H:%M:%S"),
    },
    Builtin {
        name: "now_DE",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%d.%m.%Y, %H:%M:%S"),
    },
    Builtin {
        name: "now",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%Y-%m-%d %H:%M:%S"),
    },
    Builtin {
        name: "date",
        arg: ArgSpec::Optional,
        unsafe_fn: false,
        eval: |_, arg| format_now(arg.unwrap_or("%Y-%m-%d")),
    },
    Builtin {
        name: "year",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%Y"),
    },
    Builtin {
        name: "month_MM",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%m"),
    },
    Builtin {
        name: "month",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%B"),
    },
    Builtin {
        name: "day_of_month_DD",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%d"),
    },
    Builtin {
        name: "day_of_month",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%-d"),
    },
    Builtin {
        name: "day_of_week",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%A"),
    },
    Builtin {
        name: "time_HH_MM",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%H:%M"),
    },
    Builtin {
        name: "time_HH",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%H"),
    },
    Builtin {
        name: "time",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| format_now("%H:%M:%S"),
    },
    Builtin {
        name: "timestamp",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| Ok(Utc::now().timestamp_millis().to_string()),
    },
    Builtin {
        name: "random10",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| Ok(random_digits(10)),
    },
    Builtin {
        name: "random",
        arg: ArgSpec::Required,
        unsafe_fn: false,
        eval: |_, arg| {
            let length: usize = arg
                .unwrap_or_default()
                .trim()
                .parse()
                .map_err(|_| {
                    EngineError::Compile(format!(
                        "$random length must be a number, got \"{}\"",
                        arg.unwrap_or_default()
                    ))
                })?;
            Ok(random_digits(length))
        },
    },
    Builtin {
        name: "uniqid",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |_, _| Ok(uuid::Uuid::new_v4().to_string()),
    },
    Builtin {
        name: "env",
        arg: ArgSpec::Required,
        unsafe_fn: true,
        eval: |_, arg| {
            let name = arg.unwrap_or_default();
            std::env::var(name).map_err(|_| {
                EngineError::Compile(format!("environment variable \"{}\" is not set", name))
            })
        },
    },
    Builtin {
        name: "cap",
        arg: ArgSpec::Required,
        unsafe_fn: false,
        eval: |env, arg| {
            let name = arg.unwrap_or_default();
            env.caps
                .extra(name)
                .map(String::from)
                .ok_or_else(|| {
                    EngineError::Compile(format!("capability \"{}\" is not set", name))
                })
        },
    },
    Builtin {
        name: "msg",
        arg: ArgSpec::Required,
        unsafe_fn: false,
        eval: |env, arg| {
            let pointer = arg.unwrap_or_default();
            let msg = env.bot_msg.ok_or_else(|| {
                EngineError::Compile("$msg is only available after a bot reply".to_string())
            })?;
            let value = serde_json::to_value(msg)
                .map_err(|e| EngineError::Compile(format!("$msg serialization failed: {}", e)))?;
            let found = value.pointer(pointer).ok_or_else(|| {
                EngineError::Compile(format!("$msg pointer \"{}\" not found", pointer))
            })?;
            Ok(match found {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        },
    },
    Builtin {
        name: "projectname",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |env, _| Ok(env.caps.project_name.clone()),
    },
    Builtin {
        name: "testsessionname",
        arg: ArgSpec::None,
        unsafe_fn: false,
        eval: |env, _| Ok(env.caps.test_session_name.clone()),
    },
];

/// True when `name` (without `$`) is a reserved built-in function name
pub fn is_reserved(name: &str) -> bool {
    BUILTINS.iter().any(|b| b.name == name)
}

fn format_now(fmt: &str) -> Result<String, EngineError> {
    let mut out = String::new();
    write!(out, "{}", Local::now().format(fmt))
        .map_err(|_| EngineError::Compile(format!("invalid date format \"{}\"", fmt)))?;
    Ok(out)
}

/// Decimal digit string of the requested length, derived from v4 UUIDs
fn random_digits(length: usize) -> String {
    let mut digits = String::with_capacity(length);
    while digits.len() < length {
        for byte in uuid::Uuid::new_v4().as_bytes() {
            if digits.len() >= length {
                break;
            }
            digits.push(char::from(b'0' + byte % 10));
        }
    }
    digits
}

/// Substitute built-in function tokens and memory variables into `text`.
///
/// Idempotent on fully substituted text: all tokens resolve to plain values,
/// never to further substitutable expressions.
pub fn apply(
    caps: &Caps,
    memory: &ScriptingMemory,
    bot_msg: Option<&BotMessage>,
    text: &str,
) -> Result<String, EngineError> {
    if !text.contains('$') {
        return Ok(text.to_string());
    }
    let env = ApplyEnv { caps, bot_msg };

    // Longest-token-first table over the union of memory keys and builtins.
    // Memory entries override same-named builtins once set.
    enum Token<'m> {
        Memory(&'m str),
        Function(&'static Builtin),
    }
    let mut tokens: Vec<(String, Token<'_>)> = Vec::with_capacity(memory.len() + BUILTINS.len());
    for (key, value) in memory {
        tokens.push((key.clone(), Token::Memory(value)));
    }
    for builtin in BUILTINS {
        let token = format!("${}", builtin.name);
        if !memory.contains_key(&token) {
            tokens.push((token, Token::Function(builtin)));
        }
    }
    tokens.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

    let mut out = text.to_string();
    for (token, kind) in &tokens {
        if !out.contains(token.as_str()) {
            continue;
        }
        match kind {
            Token::Memory(value) => {
                out = out.replace(token.as_str(), value);
            }
            Token::Function(builtin) => {
                if builtin.unsafe_fn && !caps.security.allow_unsafe {
                    return Err(EngineError::Security(format!(
                        "script function ${} is not allowed without the allow_unsafe switch",
                        builtin.name
                    )));
                }
                if builtin.arg != ArgSpec::None {
                    out = replace_with_arg(&out, token, builtin, &env)?;
                }
                if out.contains(token.as_str()) {
                    if builtin.arg == ArgSpec::Required {
                        return Err(EngineError::Compile(format!(
                            "script function {} requires an argument",
                            token
                        )));
                    }
                    let value = (builtin.eval)(&env, None)?;
                    out = out.replace(token.as_str(), &value);
                }
            }
        }
    }
    Ok(out)
}

/// Replace every `$name(arg)` occurrence in a single left-to-right pass
fn replace_with_arg(
    text: &str,
    token: &str,
    builtin: &Builtin,
    env: &ApplyEnv<'_>,
) -> Result<String, EngineError> {
    let pattern = format!(r"{}\(([^)]*)\)", regex::escape(token));
    let re = Regex::new(&pattern)
        .map_err(|e| EngineError::Compile(format!("internal token pattern error: {}", e)))?;

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for captures in re.captures_iter(text) {
        let whole = match captures.get(0) {
            Some(m) => m,
            None => continue,
        };
        let arg = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        out.push_str(&text[last..whole.start()]);
        out.push_str(&(builtin.eval)(env, Some(arg))?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Apply scripting memory substitution to a list of plugin arguments
pub fn apply_to_args(
    caps: &Caps,
    memory: &ScriptingMemory,
    bot_msg: Option<&BotMessage>,
    args: &[String],
) -> Result<Vec<String>, EngineError> {
    args.iter()
        .map(|arg| apply(caps, memory, bot_msg, arg))
        .collect()
}

/// Extract the distinct `$name` variable names from a text, in order of
/// first appearance (names without the leading `$`)
pub fn extract_var_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for captures in var_token_regex().captures_iter(text) {
        if let Some(name) = captures.get(1) {
            if !names.iter().any(|n| n == name.as_str()) {
                names.push(name.as_str().to_string());
            }
        }
    }
    names
}

fn var_token_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"\$(\w+)").unwrap()
    })
}

fn capture_group(mode: FillMode) -> &'static str {
    match mode {
        FillMode::Word => r"(\w+)",
        FillMode::NonSpace => r"(\S+)",
        FillMode::Joker => "(.*)",
    }
}

/// Substitute only known memory entries, leaving builtins and unknown
/// variables untouched. Used to narrow an expected pattern before capture.
fn apply_memory_only(memory: &ScriptingMemory, text: &str) -> String {
    let mut keys: Vec<&String> = memory.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut out = text.to_string();
    for key in keys {
        if out.contains(key.as_str()) {
            if let Some(value) = memory.get(key) {
                out = out.replace(key.as_str(), value);
            }
        }
    }
    out
}

/// Derive new memory entries by matching the bot's actual text against the
/// expected utterance.
///
/// Every unresolved `$name` placeholder in the expected text becomes a
/// capture group; each captured value is stored under its variable name
/// unless that name collides with a reserved built-in, in which case the
/// write is skipped and logged. When the expected text names an utterance
/// list, each alternative is tried in turn and the first match wins.
pub fn fill(
    caps: &Caps,
    memory: &mut ScriptingMemory,
    actual: &str,
    expected: &str,
    utterances: &HashMap<String, Utterance>,
) {
    if !caps.scripting.enable_memory {
        return;
    }

    let alternatives: Vec<String> = match utterances.get(expected) {
        Some(utterance) => utterance.alternatives.clone(),
        None => vec![expected.to_string()],
    };

    for alternative in alternatives {
        let narrowed = apply_memory_only(memory, &alternative);
        if !narrowed.contains('$') {
            continue;
        }

        // Build one anchored pattern: literals escaped, every $name
        // occurrence replaced by a capture group.
        let mut pattern = String::from("^");
        let mut names: Vec<String> = Vec::new();
        let mut last = 0;
        for captures in var_token_regex().captures_iter(&narrowed) {
            let (whole, name) = match (captures.get(0), captures.get(1)) {
                (Some(w), Some(n)) => (w, n),
                _ => continue,
            };
            pattern.push_str(&regex::escape(&narrowed[last..whole.start()]));
            pattern.push_str(capture_group(caps.scripting.fill_mode));
            names.push(name.as_str().to_string());
            last = whole.end();
        }
        pattern.push_str(&regex::escape(&narrowed[last..]));
        pattern.push('$');

        if names.is_empty() {
            continue;
        }
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("fill pattern for \"{}\" did not compile: {}", narrowed, e);
                continue;
            }
        };

        if let Some(captures) = re.captures(actual) {
            for (index, name) in names.iter().enumerate() {
                let value = match captures.get(index + 1) {
                    Some(m) => m.as_str(),
                    None => continue,
                };
                if is_reserved(name) {
                    warn!(
                        "scripting memory variable ${} collides with a reserved word, skipped",
                        name
                    );
                    continue;
                }
                debug!("scripting memory fill: ${} = \"{}\"", name, value);
                memory.insert(format!("${}", name), value.to_string());
            }
            return;
        }
    }
}
