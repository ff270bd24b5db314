//! Container wrapping a connector and its reply queue
//!
//! The container is the engine's only surface towards the bot: it forwards
//! outbound messages to the connector, drains the reply queue with a bounded
//! wait, and delegates lifecycle calls. The queue is shared with the
//! connector through a [`QueueBotSays`] handle created at wiring time.

use sdk::connector::{Connector, ConnectorMeta, QueueBotSays, ReplyQueue};
use sdk::errors::EngineError;
use sdk::types::BotMessage;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct Container {
    connector: Arc<dyn Connector>,
    queue: Arc<ReplyQueue>,
}

impl Container {
    /// Wrap an already wired connector and its queue
    pub fn new(connector: Arc<dyn Connector>, queue: Arc<ReplyQueue>) -> Self {
        Self { connector, queue }
    }

    /// Create a queue and wire a connector to it through the build closure
    pub fn wire<F>(build: F) -> Self
    where
        F: FnOnce(QueueBotSays) -> Arc<dyn Connector>,
    {
        let queue = ReplyQueue::new();
        let connector = build(QueueBotSays::new(Arc::clone(&queue)));
        Self { connector, queue }
    }

    pub fn meta(&self) -> ConnectorMeta {
        self.connector.meta()
    }

    /// The shared reply queue, for queue-management hooks
    pub fn queue(&self) -> Arc<ReplyQueue> {
        Arc::clone(&self.queue)
    }

    /// Deliver an outbound message to the bot
    pub async fn user_says(&self, msg: &BotMessage) -> Result<(), EngineError> {
        debug!("user says: {:?}", msg.message_text);
        self.connector.user_says(msg).await
    }

    /// Wait up to `timeout_ms` for the next bot reply; `None` on timeout
    pub async fn wait_bot_says(&self, timeout_ms: u64) -> Option<BotMessage> {
        self.queue.wait(Duration::from_millis(timeout_ms)).await
    }

    /// Number of unconsumed bot replies
    pub async fn queue_length(&self) -> usize {
        self.queue.len().await
    }

    /// Drop all queued replies, returning how many were discarded
    pub async fn empty_queue(&self) -> usize {
        self.queue.drain().await
    }

    pub async fn validate(&self) -> Result<(), EngineError> {
        self.connector.validate().await
    }

    pub async fn build(&self) -> Result<(), EngineError> {
        self.connector.build().await
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        self.connector.start().await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.connector.stop().await
    }

    pub async fn clean(&self) -> Result<(), EngineError> {
        self.connector.clean().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Echoes every outbound text back as "You said: <text>"
    struct EchoingConnector {
        replies: QueueBotSays,
    }

    #[async_trait]
    impl Connector for EchoingConnector {
        fn meta(&self) -> ConnectorMeta {
            ConnectorMeta {
                plugin_version: "1",
                name: "echoing".to_string(),
                description: "test echo".to_string(),
            }
        }

        async fn user_says(&self, msg: &BotMessage) -> Result<(), EngineError> {
            let text = msg.message_text.clone().unwrap_or_default();
            self.replies.send(BotMessage::text(format!("You said: {}", text))).await;
            Ok(())
        }
    }

    fn echo_container() -> Container {
        Container::wire(|replies| Arc::new(EchoingConnector { replies }))
    }

    #[tokio::test]
    async fn test_user_says_produces_reply() {
        let container = echo_container();
        container.user_says(&BotMessage::text("hi")).await.unwrap();

        let reply = container.wait_bot_says(100).await.unwrap();
        assert_eq!(reply.message_text.as_deref(), Some("You said: hi"));
    }

    #[tokio::test]
    async fn test_wait_times_out_without_reply() {
        let container = echo_container();
        assert!(container.wait_bot_says(20).await.is_none());
    }

    #[tokio::test]
    async fn test_queue_length_and_empty() {
        let container = echo_container();
        container.user_says(&BotMessage::text("a")).await.unwrap();
        container.user_says(&BotMessage::text("b")).await.unwrap();

        assert_eq!(container.queue_length().await, 2);
        assert_eq!(container.empty_queue().await, 2);
        assert_eq!(container.queue_length().await, 0);
    }

    #[tokio::test]
    async fn test_lifecycle_defaults() {
        let container = echo_container();
        container.validate().await.unwrap();
        container.build().await.unwrap();
        container.start().await.unwrap();
        container.stop().await.unwrap();
        container.clean().await.unwrap();
    }
}
