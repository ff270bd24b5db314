// Convocheck conversation testing engine
// Main entry point for the convocheck binary

use anyhow::{bail, Context};
use clap::Parser;
use convocheck_engine::cli::{Cli, Command, DumpFormat};
use convocheck_engine::compiler::{CompileResult, Compiler, ScriptFormat, ScriptType};
use convocheck_engine::config::Caps;
use convocheck_engine::container::Container;
use convocheck_engine::dispatch::PluginRegistry;
use convocheck_engine::executor::ConvoRunner;
use echo_connector::EchoConnector;
use sdk::types::Utterance;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Convocheck v{}", env!("CARGO_PKG_VERSION"));

    let caps = match &cli.config {
        Some(path) => Caps::load(path)
            .with_context(|| format!("failed to load capabilities from {}", path.display()))?,
        None => Caps::default(),
    };

    let registry = Arc::new(PluginRegistry::with_builtins());
    let compiler = Compiler::new(caps.clone(), Arc::clone(&registry));

    match cli.command {
        Command::Run { scripts } => {
            let (result, utterances) = compile_scripts(&compiler, &scripts)?;
            if result.convos.is_empty() {
                bail!("no convos found in the given script files");
            }

            let runner = ConvoRunner::new(caps, Arc::clone(&registry))?
                .with_utterances(utterances);

            let mut failed = 0usize;
            let total = result.convos.len();
            for convo in &result.convos {
                // A fresh container per convo keeps reply queues isolated
                let container = Container::wire(|replies| Arc::new(EchoConnector::new(replies)));
                container.start().await?;

                match runner.run(convo, &container).await {
                    Ok(transcript) => {
                        if cli.json {
                            println!("{}", serde_json::to_string_pretty(&transcript)?);
                        } else {
                            println!("PASS {}", convo.header.name);
                        }
                    }
                    Err(err) => {
                        failed += 1;
                        if cli.json {
                            println!("{}", serde_json::to_string_pretty(&err.transcript)?);
                        } else {
                            println!("FAIL {}: {}", convo.header.name, err);
                        }
                    }
                }

                container.stop().await?;
            }

            if failed > 0 {
                bail!("{} of {} convo(s) failed", failed, total);
            }
            println!("{} convo(s) passed", total);
            Ok(())
        }

        Command::Compile { scripts, format } => {
            let (result, _) = compile_scripts(&compiler, &scripts)?;
            let format = match format {
                DumpFormat::Txt => ScriptFormat::Txt,
                DumpFormat::Json => ScriptFormat::Json,
            };
            print!("{}", compiler.decompile(&result.convos, format)?);
            Ok(())
        }
    }
}

/// Compile and expand all given script files into one result.
///
/// Returns the utterance map alongside, captured before expansion bakes the
/// utterances into convo variants.
fn compile_scripts(
    compiler: &Compiler,
    scripts: &[std::path::PathBuf],
) -> anyhow::Result<(CompileResult, HashMap<String, Utterance>)> {
    let mut result = CompileResult::default();
    for path in scripts {
        let buffer = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let (format, script_type) = detect_script_kind(path)?;
        let compiled = compiler
            .compile(&buffer, format, script_type)
            .with_context(|| format!("failed to compile {}", path.display()))?;
        result.merge(compiled)?;
    }

    let utterances = result.utterances.clone();
    compiler.expand_convos(&mut result)?;
    Ok((result, utterances))
}

/// Script format and content type from the file name convention
fn detect_script_kind(path: &Path) -> anyhow::Result<(ScriptFormat, ScriptType)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();

    if name.ends_with(".json") {
        // JSON scripts are self-describing
        return Ok((ScriptFormat::Json, ScriptType::Convo));
    }
    if name.ends_with(".pconvo.txt") {
        return Ok((ScriptFormat::Txt, ScriptType::PartialConvo));
    }
    if name.ends_with(".utterances.txt") {
        return Ok((ScriptFormat::Txt, ScriptType::Utterances));
    }
    if name.ends_with(".scriptingmemory.txt") {
        return Ok((ScriptFormat::Txt, ScriptType::ScriptingMemory));
    }
    if name.ends_with(".convo.txt") || name.ends_with(".txt") {
        return Ok((ScriptFormat::Txt, ScriptType::Convo));
    }
    bail!(
        "cannot determine script type of {}: expected *.convo.txt, *.pconvo.txt, \
         *.utterances.txt, *.scriptingmemory.txt or *.json",
        path.display()
    );
}
