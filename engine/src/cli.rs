//! CLI interface for Convocheck
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags; the command handlers live in
//! `main.rs` and stay thin wrappers around the library.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Convocheck conversation testing engine
///
/// Compiles conversation test scripts and plays them against a bot
/// connector, asserting every bot reply along the way.
#[derive(Parser, Debug)]
#[command(name = "convocheck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Specify a capability configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile script files and run every convo against the echo connector
    Run {
        /// Script files (*.convo.txt, *.pconvo.txt, *.utterances.txt,
        /// *.scriptingmemory.txt, *.json)
        #[arg(required = true)]
        scripts: Vec<PathBuf>,
    },

    /// Compile script files and dump the expanded convos
    Compile {
        /// Script files to compile
        #[arg(required = true)]
        scripts: Vec<PathBuf>,

        /// Output format of the dump
        #[arg(long, value_enum, default_value_t = DumpFormat::Txt)]
        format: DumpFormat,
    },
}

/// Serialization format for `compile` output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpFormat {
    Txt,
    Json,
}
