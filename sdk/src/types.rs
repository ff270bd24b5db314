//! Canonical conversation data model
//!
//! These types are the contract between the format parsers, the compiler and
//! the execution engine: every script format compiles down to [`Convo`] /
//! [`ConvoStep`] values, and the engine only ever operates on this shape.
//!
//! A [`ConvoStep`] carries declarative references ([`StepRef`]) to registered
//! asserters, logic hooks and user inputs. Arguments are positional strings;
//! each plugin parses its own arguments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-run variable store (`$name` -> value).
///
/// Created empty at convo begin, mutated by `fill()` and by the scripting
/// memory logic hooks, consumed by `apply()` before every outbound message.
/// Keys carry the leading `$`.
pub type ScriptingMemory = BTreeMap<String, String>;

/// Who is speaking in a conversation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Outbound step, driven by the test engine
    Me,
    /// Inbound step, expected from the bot
    Bot,
}

impl Sender {
    /// Section marker as it appears in textual script formats
    pub fn marker(&self) -> &'static str {
        match self {
            Sender::Me => "#me",
            Sender::Bot => "#bot",
        }
    }
}

/// Declarative reference to a registered plugin with positional string
/// arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRef {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl StepRef {
    /// Create a new reference
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Conditional step group membership
///
/// Steps sharing a `condition_group_id` form a group; exactly one branch of a
/// group executes per run. `skip` is mutated at run time by conditional logic
/// hooks during the bot-prepare phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditional {
    pub condition_group_id: String,
    #[serde(default)]
    pub condition_group_end: bool,
    #[serde(default)]
    pub skip: bool,
}

/// One turn of a conversation plus its attached plugin references
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoStep {
    pub sender: Sender,

    /// Free-text content of the step (expected bot text, or outbound text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,

    /// Structured content when the step body is a JSON object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<serde_json::Value>,

    /// Negate the text match / assertion outcome for this step
    #[serde(default)]
    pub not: bool,

    /// When true, a missing bot reply skips the step instead of failing
    #[serde(default)]
    pub optional: bool,

    /// Human-readable source locator (file/line), used in all error messages
    pub step_tag: String,

    #[serde(default)]
    pub asserters: Vec<StepRef>,

    #[serde(default)]
    pub logic_hooks: Vec<StepRef>,

    #[serde(default)]
    pub user_inputs: Vec<StepRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<Conditional>,
}

impl ConvoStep {
    /// Create an empty step for the given sender and source locator
    pub fn new(sender: Sender, step_tag: impl Into<String>) -> Self {
        Self {
            sender,
            message_text: None,
            source_data: None,
            not: false,
            optional: false,
            step_tag: step_tag.into(),
            asserters: Vec::new(),
            logic_hooks: Vec::new(),
            user_inputs: Vec::new(),
            conditional: None,
        }
    }

    /// True when the step carries no content and no plugin references
    pub fn is_empty(&self) -> bool {
        self.message_text.is_none()
            && self.source_data.is_none()
            && self.asserters.is_empty()
            && self.logic_hooks.is_empty()
            && self.user_inputs.is_empty()
    }
}

/// Convo header: identity and description
///
/// `name` is the identity of a convo and must be unique within a compiled
/// script set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvoHeader {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One canonical, ordered conversation script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Convo {
    pub header: ConvoHeader,
    pub conversation: Vec<ConvoStep>,

    /// Seed scripting memory for this convo, populated by utterance and
    /// scripting-memory expansion
    #[serde(default)]
    pub scripting_memory: ScriptingMemory,
}

impl Convo {
    /// Create a convo with the given name and steps
    pub fn new(name: impl Into<String>, conversation: Vec<ConvoStep>) -> Self {
        Self {
            header: ConvoHeader {
                name: name.into(),
                description: None,
            },
            conversation,
            scripting_memory: ScriptingMemory::new(),
        }
    }
}

/// A named, reusable step fragment inserted via INCLUDE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialConvo {
    pub name: String,
    pub steps: Vec<ConvoStep>,
}

/// A named utterance list: one name, many alternative phrasings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub name: String,
    pub alternatives: Vec<String>,
}

/// A button attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// A media attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub media_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A rich card with optional nested buttons and media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtext: Option<String>,
    #[serde(default)]
    pub buttons: Vec<Button>,
    #[serde(default)]
    pub media: Vec<Media>,
}

/// A form field on a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// NLP metadata attached to a bot reply by the connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlpInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// The message shape exchanged with the bot connector, in both directions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,

    #[serde(default)]
    pub buttons: Vec<Button>,

    #[serde(default)]
    pub media: Vec<Media>,

    #[serde(default)]
    pub cards: Vec<Card>,

    #[serde(default)]
    pub forms: Vec<FormField>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlp: Option<NlpInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<serde_json::Value>,
}

impl BotMessage {
    /// Create a plain text message
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message_text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Attach a button
    pub fn with_button(mut self, text: impl Into<String>, payload: Option<String>) -> Self {
        self.buttons.push(Button {
            text: text.into(),
            payload,
        });
        self
    }

    /// Attach a media item
    pub fn with_media(mut self, media_uri: impl Into<String>) -> Self {
        self.media.push(Media {
            media_uri: media_uri.into(),
            alt_text: None,
            mime_type: None,
        });
        self
    }

    /// Attach a card
    pub fn with_card(mut self, card: Card) -> Self {
        self.cards.push(card);
        self
    }

    /// All text fragments carried by this message, in display order.
    ///
    /// Used by text asserters: the message text first, then card texts and
    /// subtexts.
    pub fn text_fragments(&self) -> Vec<&str> {
        let mut fragments = Vec::new();
        if let Some(ref text) = self.message_text {
            fragments.push(text.as_str());
        }
        for card in &self.cards {
            fragments.push(card.text.as_str());
            if let Some(ref subtext) = card.subtext {
                fragments.push(subtext.as_str());
            }
        }
        fragments
    }

    /// True when the message carries no content at all
    pub fn is_empty(&self) -> bool {
        self.message_text.as_deref().unwrap_or("").is_empty()
            && self.buttons.is_empty()
            && self.media.is_empty()
            && self.cards.is_empty()
            && self.forms.is_empty()
            && self.source_data.is_none()
    }
}

/// The recorded trace of one convo step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptStep {
    pub step_begin: DateTime<Utc>,
    pub step_end: DateTime<Utc>,

    /// The message actually sent (me steps) or received (bot steps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<BotMessage>,

    /// The expected step, for bot steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<ConvoStep>,

    pub not: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,

    /// Scripting memory snapshot at step end
    pub scripting_memory: ScriptingMemory,
}

/// The recorded, timestamped trace of one convo run
///
/// Built incrementally during a run and immutable once the run settles. On
/// failure the partial transcript is attached to the error so a caller can
/// inspect exactly how far the run progressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub convo_begin: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convo_end: Option<DateTime<Utc>>,

    /// Scripting memory snapshot at convo end
    pub scripting_memory: ScriptingMemory,

    pub steps: Vec<TranscriptStep>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl Transcript {
    /// Start a transcript for a convo run beginning now
    pub fn begin(scripting_memory: ScriptingMemory) -> Self {
        Self {
            convo_begin: Utc::now(),
            convo_end: None,
            scripting_memory,
            steps: Vec::new(),
            err: None,
        }
    }

    /// Settle the transcript, recording the end timestamp and final memory
    pub fn finish(&mut self, scripting_memory: ScriptingMemory, err: Option<String>) {
        self.convo_end = Some(Utc::now());
        self.scripting_memory = scripting_memory;
        self.err = err;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convo_step_new_is_empty() {
        let step = ConvoStep::new(Sender::Me, "Line 1");
        assert!(step.is_empty());
        assert_eq!(step.step_tag, "Line 1");
        assert!(!step.not);
        assert!(!step.optional);
    }

    #[test]
    fn test_convo_step_with_text_not_empty() {
        let mut step = ConvoStep::new(Sender::Bot, "Line 3");
        step.message_text = Some("hello".to_string());
        assert!(!step.is_empty());
    }

    #[test]
    fn test_sender_marker() {
        assert_eq!(Sender::Me.marker(), "#me");
        assert_eq!(Sender::Bot.marker(), "#bot");
    }

    #[test]
    fn test_bot_message_text_fragments() {
        let msg = BotMessage::text("main text").with_card(Card {
            text: "card text".to_string(),
            subtext: Some("card subtext".to_string()),
            buttons: vec![],
            media: vec![],
        });

        let fragments = msg.text_fragments();
        assert_eq!(fragments, vec!["main text", "card text", "card subtext"]);
    }

    #[test]
    fn test_bot_message_is_empty() {
        assert!(BotMessage::default().is_empty());
        assert!(!BotMessage::text("x").is_empty());
        assert!(!BotMessage::default().with_button("ok", None).is_empty());
    }

    #[test]
    fn test_bot_message_builders() {
        let msg = BotMessage::text("pick one")
            .with_button("yes", Some("YES".to_string()))
            .with_button("no", None)
            .with_media("http://example.com/a.png");

        assert_eq!(msg.buttons.len(), 2);
        assert_eq!(msg.buttons[0].payload.as_deref(), Some("YES"));
        assert_eq!(msg.media.len(), 1);
    }

    #[test]
    fn test_convo_step_serialization_roundtrip() {
        let mut step = ConvoStep::new(Sender::Bot, "Line 7");
        step.message_text = Some("hi".to_string());
        step.not = true;
        step.asserters.push(StepRef::new(
            "BUTTONS",
            vec!["2".to_string()],
        ));
        step.conditional = Some(Conditional {
            condition_group_id: "g1".to_string(),
            condition_group_end: false,
            skip: false,
        });

        let serialized = serde_json::to_string(&step).unwrap();
        let deserialized: ConvoStep = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.message_text.as_deref(), Some("hi"));
        assert!(deserialized.not);
        assert_eq!(deserialized.asserters.len(), 1);
        assert_eq!(
            deserialized.conditional.unwrap().condition_group_id,
            "g1"
        );
    }

    #[test]
    fn test_source_data_json() {
        let mut step = ConvoStep::new(Sender::Me, "Line 2");
        step.source_data = Some(json!({"intent": "greeting"}));
        let serialized = serde_json::to_string(&step).unwrap();
        assert!(serialized.contains("greeting"));
    }

    #[test]
    fn test_transcript_begin_finish() {
        let mut memory = ScriptingMemory::new();
        memory.insert("$input".to_string(), "OUTPUT1".to_string());

        let mut transcript = Transcript::begin(ScriptingMemory::new());
        assert!(transcript.convo_end.is_none());

        transcript.finish(memory, None);
        assert!(transcript.convo_end.is_some());
        assert_eq!(
            transcript.scripting_memory.get("$input").map(String::as_str),
            Some("OUTPUT1")
        );
        assert!(transcript.err.is_none());
    }
}
