//! Convocheck SDK
//!
//! Shared library providing the canonical conversation model, error types and
//! plugin traits for Convocheck components. This crate is used by both the
//! engine and connector plugins.

/// Canonical conversation data model
pub mod types;

/// Error types and handling
pub mod errors;

/// Asserter / logic hook / user input plugin contract
pub mod plugin;

/// Bot connector plugin contract and reply queue
pub mod connector;

// Re-export commonly used types
pub use connector::{Connector, ConnectorMeta, QueueBotSays, ReplyQueue};
pub use errors::{AssertionFailure, ConvocheckErrorExt, EngineError, RunError, TIMEOUT_MARKER};
pub use plugin::{Asserter, AsserterContext, HookContext, LogicHook, UserInput};
pub use types::{
    BotMessage, Button, Card, Conditional, Convo, ConvoHeader, ConvoStep, FormField, Media,
    PartialConvo, ScriptingMemory, Sender, StepRef, Transcript, TranscriptStep, Utterance,
};
