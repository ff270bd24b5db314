//! Integration tests for the script compiler
//!
//! Exercises the file-driven compile pipeline end to end: multiple script
//! files merged into one compile result, partial convo expansion with cycle
//! detection, utterance and scripting memory variants.

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use convocheck_engine::compiler::{CompileResult, Compiler, ScriptFormat, ScriptType};
use convocheck_engine::config::Caps;
use convocheck_engine::dispatch::PluginRegistry;

fn compiler(caps: Caps) -> Compiler {
    Compiler::new(caps, Arc::new(PluginRegistry::with_builtins()))
}

fn compile_file(
    compiler: &Compiler,
    result: &mut CompileResult,
    path: &std::path::Path,
    script_type: ScriptType,
) {
    let buffer = fs::read_to_string(path).unwrap();
    let compiled = compiler
        .compile(&buffer, ScriptFormat::Txt, script_type)
        .unwrap();
    result.merge(compiled).unwrap();
}

#[tokio::test]
async fn test_multi_file_compile_with_partial_and_utterances() {
    let dir = TempDir::new().unwrap();

    let convo_path = dir.path().join("order.convo.txt");
    fs::write(
        &convo_path,
        "order flow\n\n#me\nINCLUDE login\n\n#me\nGREETING\n\n#bot\nwelcome back\n",
    )
    .unwrap();

    let pconvo_path = dir.path().join("login.pconvo.txt");
    fs::write(
        &pconvo_path,
        "login\n\n#me\nlog me in\n\n#bot\nyou are logged in\n",
    )
    .unwrap();

    let utterances_path = dir.path().join("greeting.utterances.txt");
    fs::write(&utterances_path, "GREETING\nhi\nhello there\n").unwrap();

    let compiler = compiler(Caps::default());
    let mut result = CompileResult::default();
    compile_file(&compiler, &mut result, &convo_path, ScriptType::Convo);
    compile_file(&compiler, &mut result, &pconvo_path, ScriptType::PartialConvo);
    compile_file(&compiler, &mut result, &utterances_path, ScriptType::Utterances);

    compiler.expand_convos(&mut result).unwrap();

    // 2 utterance alternatives make 2 convo variants
    assert_eq!(result.convos.len(), 2);
    let names: Vec<&str> = result.convos.iter().map(|c| c.header.name.as_str()).collect();
    assert!(names.contains(&"order flow/GREETING-L1"));
    assert!(names.contains(&"order flow/GREETING-L2"));

    // Partial convo steps spliced in place of the INCLUDE step
    let first = &result.convos[0];
    assert_eq!(first.conversation.len(), 4);
    assert_eq!(
        first.conversation[0].message_text.as_deref(),
        Some("log me in")
    );
    assert_eq!(
        first.conversation[1].message_text.as_deref(),
        Some("you are logged in")
    );

    // Utterance reference replaced by the variant's alternative
    let variant_texts: Vec<Option<&str>> = result
        .convos
        .iter()
        .map(|c| c.conversation[2].message_text.as_deref())
        .collect();
    assert!(variant_texts.contains(&Some("hi")));
    assert!(variant_texts.contains(&Some("hello there")));
}

#[tokio::test]
async fn test_nested_partials_expand_in_either_definition_order() {
    let convo = "outer\n\n#me\nINCLUDE first\n";
    let first = "first\n\n#me\nINCLUDE second\n";
    let second = "second\n\n#me\ninnermost text\n";

    for order in [[first, second], [second, first]] {
        let compiler = compiler(Caps::default());
        let mut result = compiler
            .compile(convo, ScriptFormat::Txt, ScriptType::Convo)
            .unwrap();
        for partial in order {
            let compiled = compiler
                .compile(partial, ScriptFormat::Txt, ScriptType::PartialConvo)
                .unwrap();
            result.merge(compiled).unwrap();
        }

        compiler.expand_convos(&mut result).unwrap();
        assert_eq!(result.convos.len(), 1);
        assert_eq!(
            result.convos[0].conversation[0].message_text.as_deref(),
            Some("innermost text")
        );
    }
}

#[tokio::test]
async fn test_cycle_rejected_in_either_definition_order() {
    let convo = "outer\n\n#me\nINCLUDE first\n";
    let first = "first\n\n#me\nINCLUDE second\n";
    let second = "second\n\n#me\nINCLUDE first\n";

    for order in [[first, second], [second, first]] {
        let compiler = compiler(Caps::default());
        let mut result = compiler
            .compile(convo, ScriptFormat::Txt, ScriptType::Convo)
            .unwrap();
        for partial in order {
            let compiled = compiler
                .compile(partial, ScriptFormat::Txt, ScriptType::PartialConvo)
                .unwrap();
            result.merge(compiled).unwrap();
        }

        let err = compiler.expand_convos(&mut result).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Cycle found in partial convos"), "{}", msg);
        assert!(msg.contains("\"first\""), "{}", msg);
        assert!(msg.contains("\"/first/second\""), "{}", msg);
    }
}

#[tokio::test]
async fn test_duplicate_partial_name_across_files_rejected() {
    let compiler = compiler(Caps::default());
    let mut result = compiler
        .compile(
            "login\n\n#me\nvariant one\n",
            ScriptFormat::Txt,
            ScriptType::PartialConvo,
        )
        .unwrap();
    let duplicate = compiler
        .compile(
            "login\n\n#me\nvariant two\n",
            ScriptFormat::Txt,
            ScriptType::PartialConvo,
        )
        .unwrap();

    let err = result.merge(duplicate).unwrap_err();
    assert!(err.to_string().contains("duplicate partial convo"));
}

#[tokio::test]
async fn test_scripting_memory_files_multiply_convos() {
    let mut caps = Caps::default();
    caps.scripting.enable_memory = true;
    let compiler = compiler(caps);

    let mut result = compiler
        .compile(
            "buy\n\n#me\nI want $productName\n\n#bot\nadded $productName\n",
            ScriptFormat::Txt,
            ScriptType::Convo,
        )
        .unwrap();
    for case in [
        "bread_case\n$productName|Bread\n",
        "cheese_case\n$productName|Cheese\n",
    ] {
        let compiled = compiler
            .compile(case, ScriptFormat::Txt, ScriptType::ScriptingMemory)
            .unwrap();
        result.merge(compiled).unwrap();
    }

    compiler.expand_convos(&mut result).unwrap();

    assert_eq!(result.convos.len(), 2);
    let bread = result
        .convos
        .iter()
        .find(|c| c.header.name == "buy.bread_case")
        .unwrap();
    assert_eq!(
        bread.scripting_memory.get("$productName").map(String::as_str),
        Some("Bread")
    );
    assert!(result
        .convos
        .iter()
        .any(|c| c.header.name == "buy.cheese_case"));
}

#[tokio::test]
async fn test_scripting_memory_expansion_disabled_without_cap() {
    let compiler = compiler(Caps::default());
    let mut result = compiler
        .compile(
            "buy\n\n#me\nI want $productName\n",
            ScriptFormat::Txt,
            ScriptType::Convo,
        )
        .unwrap();
    let case = compiler
        .compile(
            "bread_case\n$productName|Bread\n",
            ScriptFormat::Txt,
            ScriptType::ScriptingMemory,
        )
        .unwrap();
    result.merge(case).unwrap();

    compiler.expand_convos(&mut result).unwrap();
    assert_eq!(result.convos.len(), 1);
    assert_eq!(result.convos[0].header.name, "buy");
}

#[tokio::test]
async fn test_expanded_convo_round_trips_through_txt() {
    let compiler = compiler(Caps::default());
    let mut result = compiler
        .compile(
            "checkout\nhappy path\n\n#me\npay now\nBUTTON Pay|PAY\n\n#bot\npayment received\nBUTTONS 1\n",
            ScriptFormat::Txt,
            ScriptType::Convo,
        )
        .unwrap();
    compiler.expand_convos(&mut result).unwrap();

    let rendered = compiler
        .decompile(&result.convos, ScriptFormat::Txt)
        .unwrap();
    let reparsed = compiler
        .compile(&rendered, ScriptFormat::Txt, ScriptType::Convo)
        .unwrap();

    let (a, b) = (&result.convos[0], &reparsed.convos[0]);
    assert_eq!(a.header.name, b.header.name);
    assert_eq!(a.conversation.len(), b.conversation.len());
    for (left, right) in a.conversation.iter().zip(&b.conversation) {
        assert_eq!(left.sender, right.sender);
        assert_eq!(left.message_text, right.message_text);
        assert_eq!(left.asserters, right.asserters);
        assert_eq!(left.user_inputs, right.user_inputs);
    }
}

#[tokio::test]
async fn test_json_and_txt_compile_to_same_model() {
    let compiler = compiler(Caps::default());
    let from_txt = compiler
        .compile(
            "greeting\n\n#me\nhello\n\n#bot\nhello user\nBUTTONS 2\n",
            ScriptFormat::Txt,
            ScriptType::Convo,
        )
        .unwrap();

    let rendered = compiler
        .decompile(&from_txt.convos, ScriptFormat::Json)
        .unwrap();
    let from_json = compiler
        .compile(&rendered, ScriptFormat::Json, ScriptType::Convo)
        .unwrap();

    assert_eq!(from_json.convos.len(), 1);
    let (a, b) = (&from_txt.convos[0], &from_json.convos[0]);
    assert_eq!(a.header.name, b.header.name);
    assert_eq!(a.conversation.len(), b.conversation.len());
    for (left, right) in a.conversation.iter().zip(&b.conversation) {
        assert_eq!(left.sender, right.sender);
        assert_eq!(left.message_text, right.message_text);
        assert_eq!(left.asserters, right.asserters);
    }
}
