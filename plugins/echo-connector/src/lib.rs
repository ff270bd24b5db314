//! Echo Connector Plugin
//!
//! A self-contained bot connector for smoke tests and script development:
//! every outbound message is answered immediately, without any external
//! service. Replies:
//!
//! - plain text is echoed back as `You said: <text>`
//! - a clicked button is acknowledged as `You clicked: <payload>`
//! - a media attachment is acknowledged as `You sent media: <uri>`
//!
//! The connector keeps no session state; `start`/`stop` are the trait
//! defaults.

use async_trait::async_trait;
use sdk::connector::{Connector, ConnectorMeta, QueueBotSays};
use sdk::errors::EngineError;
use sdk::types::BotMessage;

pub struct EchoConnector {
    replies: QueueBotSays,
}

impl EchoConnector {
    /// Wire an echo connector to the given reply handle
    pub fn new(replies: QueueBotSays) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl Connector for EchoConnector {
    fn meta(&self) -> ConnectorMeta {
        ConnectorMeta {
            plugin_version: "1",
            name: "echo".to_string(),
            description: "Echoes every user message back, for smoke tests".to_string(),
        }
    }

    async fn user_says(&self, msg: &BotMessage) -> Result<(), EngineError> {
        if let Some(text) = msg.message_text.as_deref().filter(|t| !t.is_empty()) {
            self.replies
                .send(BotMessage::text(format!("You said: {}", text)))
                .await;
        }
        for button in &msg.buttons {
            let payload = button.payload.as_deref().unwrap_or(&button.text);
            self.replies
                .send(BotMessage::text(format!("You clicked: {}", payload)))
                .await;
        }
        for media in &msg.media {
            self.replies
                .send(BotMessage::text(format!(
                    "You sent media: {}",
                    media.media_uri
                )))
                .await;
        }
        Ok(())
    }
}
