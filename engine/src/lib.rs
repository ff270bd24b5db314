//! Convocheck Engine Library
//!
//! This library provides the core functionality of the Convocheck engine:
//! compiling conversation scripts into the canonical convo model and
//! executing them against a bot connector.
//!
//! It is used by both the main binary and integration tests.

/// Configuration (capability) management module
pub mod config;

/// Pure text-matching predicates
pub mod matching;

/// Scripting memory substitution/extraction engine
pub mod scripting_memory;

/// Script compiler and partial-convo resolution
pub mod compiler;

/// Plugin registry and dispatch bookkeeping
pub mod dispatch;

/// Built-in asserter library
pub mod asserters;

/// Built-in logic hook library
pub mod logic_hooks;

/// Built-in user input library
pub mod user_inputs;

/// Container wrapping a connector and its reply queue
pub mod container;

/// Generic retry wrapper for asynchronous operations
pub mod retry;

/// Rate limiting for connector calls
pub mod rate_limiter;

/// Convo execution engine
pub mod executor;

/// CLI interface module
pub mod cli;
