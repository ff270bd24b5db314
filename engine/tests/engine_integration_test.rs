//! End-to-end integration tests: compile a TXT script and play it against
//! the echo connector through the full container/runner stack.

use std::sync::Arc;

use convocheck_engine::compiler::{Compiler, ScriptFormat, ScriptType};
use convocheck_engine::config::Caps;
use convocheck_engine::container::Container;
use convocheck_engine::dispatch::PluginRegistry;
use convocheck_engine::executor::ConvoRunner;
use echo_connector::EchoConnector;
use sdk::errors::EngineError;
use sdk::types::Convo;

fn caps() -> Caps {
    let mut caps = Caps::default();
    caps.wait_for_bot_timeout_ms = 500;
    caps.retry_user_says.num_retries = 0;
    caps.retry_asserter.num_retries = 0;
    caps
}

fn compile(caps: &Caps, script: &str) -> Vec<Convo> {
    let registry = Arc::new(PluginRegistry::with_builtins());
    let compiler = Compiler::new(caps.clone(), registry);
    let mut result = compiler
        .compile(script, ScriptFormat::Txt, ScriptType::Convo)
        .unwrap();
    compiler.expand_convos(&mut result).unwrap();
    result.convos
}

fn echo_container() -> Container {
    Container::wire(|replies| Arc::new(EchoConnector::new(replies)))
}

fn runner(caps: Caps) -> ConvoRunner {
    ConvoRunner::new(caps, Arc::new(PluginRegistry::with_builtins())).unwrap()
}

#[tokio::test]
async fn test_compiled_convo_runs_against_echo() {
    let caps = caps();
    let convos = compile(
        &caps,
        "echo greeting\n\n#me\nhello\n\n#bot\nYou said: hello\n",
    );
    assert_eq!(convos.len(), 1);

    let container = echo_container();
    container.start().await.unwrap();
    let transcript = runner(caps).run(&convos[0], &container).await.unwrap();
    container.stop().await.unwrap();

    assert_eq!(transcript.steps.len(), 2);
    assert!(transcript.err.is_none());
}

#[tokio::test]
async fn test_fill_and_apply_span_steps() {
    let mut caps = caps();
    caps.scripting.enable_memory = true;
    let convos = compile(
        &caps,
        "memory flow\n\n#me\nhello\n\n#bot\nYou said: $greeting\n\n#me\n$greeting again\n\n#bot\nYou said: hello again\n",
    );

    let container = echo_container();
    let transcript = runner(caps).run(&convos[0], &container).await.unwrap();

    // Captured from the first reply, substituted into the second request
    assert_eq!(
        transcript.scripting_memory.get("$greeting").map(String::as_str),
        Some("hello")
    );
    assert_eq!(
        transcript.steps[2]
            .actual
            .as_ref()
            .and_then(|m| m.message_text.as_deref()),
        Some("hello again")
    );
}

#[tokio::test]
async fn test_button_input_reaches_connector() {
    let caps = caps();
    let convos = compile(
        &caps,
        "click flow\n\n#me\nBUTTON Pay|PAY\n\n#bot\nYou clicked: PAY\n",
    );

    let container = echo_container();
    let transcript = runner(caps).run(&convos[0], &container).await.unwrap();

    let sent = transcript.steps[0].actual.as_ref().unwrap();
    assert_eq!(sent.buttons.len(), 1);
}

#[tokio::test]
async fn test_negated_expectation_passes_on_mismatch() {
    let caps = caps();
    let convos = compile(&caps, "negated\n\n#me\nhello\n\n#bot\n!goodbye\n");

    let container = echo_container();
    assert!(runner(caps).run(&convos[0], &container).await.is_ok());
}

#[tokio::test]
async fn test_failing_expectation_reports_step_and_transcript() {
    let caps = caps();
    let convos = compile(
        &caps,
        "failing\n\n#me\nhello\n\n#bot\nsomething else entirely\n",
    );

    let container = echo_container();
    let err = runner(caps).run(&convos[0], &container).await.unwrap_err();

    assert!(err.to_string().contains("Line 6"));
    assert_eq!(err.transcript.steps.len(), 1);
    assert!(err.transcript.err.is_some());
}

#[tokio::test]
async fn test_unread_echo_reply_fails_convo() {
    let caps = caps();
    let convos = compile(&caps, "chatty\n\n#me\nhello\n");

    let container = echo_container();
    let err = runner(caps).run(&convos[0], &container).await.unwrap_err();
    assert!(matches!(err.error, EngineError::QueueNotEmpty { .. }));
}

#[tokio::test]
async fn test_unconsumed_count_asserter_tolerates_extra_reply() {
    let caps = caps();
    let convos = compile(
        &caps,
        "chatty but declared\n\n#me\nhello\nBOT_UNCONSUMED_COUNT <=1\n",
    );

    let container = echo_container();
    assert!(runner(caps).run(&convos[0], &container).await.is_ok());
}

#[tokio::test]
async fn test_aggregated_failures_from_script_asserters() {
    let mut caps = caps();
    caps.assertion.aggregate_errors = true;
    let convos = compile(
        &caps,
        "multi fail\n\n#me\nhello\n\n#bot\nwrong text\nBUTTONS 2\n",
    );

    let container = echo_container();
    let err = runner(caps).run(&convos[0], &container).await.unwrap_err();
    assert_eq!(err.error.assertion_causes().len(), 2);
}
