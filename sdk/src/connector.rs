//! Bot connector plugin contract
//!
//! A connector module is constructed with a [`QueueBotSays`] handle and the
//! capability set, and exposes [`Connector::user_says`] plus optional
//! lifecycle methods. Replies from the bot are pushed into the reply queue
//! through the handle; the engine drains the queue one message at a time.
//!
//! The reply queue is the only mutable resource shared between the "me" and
//! "bot" halves of a step pair. The engine never touches its internals
//! directly; queue-management logic hooks use the [`ReplyQueue`] collaborator
//! exposed through the hook context.

use crate::errors::EngineError;
use crate::types::BotMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// FIFO queue of bot replies, owned by the container.
///
/// Supports drain-one with a bounded wait, peek-length and empty-queue. The
/// wait is cancel-safe: a timed-out wait consumes nothing and leaves queued
/// messages intact.
pub struct ReplyQueue {
    items: Mutex<VecDeque<BotMessage>>,
    notify: Notify,
}

impl ReplyQueue {
    /// Create an empty reply queue
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        })
    }

    /// Append a bot reply to the queue
    pub async fn push(&self, msg: BotMessage) {
        self.items.lock().await.push_back(msg);
        self.notify.notify_one();
    }

    /// Wait up to `timeout` for the next reply.
    ///
    /// Returns `None` on timeout. A pending wait that is cancelled releases
    /// its listener and cannot fire after the step has resolved.
    pub async fn wait(&self, timeout: Duration) -> Option<BotMessage> {
        tokio::time::timeout(timeout, self.next()).await.ok()
    }

    async fn next(&self) -> BotMessage {
        loop {
            // Register for notification before checking the queue, so a push
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(msg) = self.items.lock().await.pop_front() {
                return msg;
            }
            notified.await;
        }
    }

    /// Number of unconsumed replies
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// True when no replies are queued
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Drop all queued replies, returning how many were discarded
    pub async fn drain(&self) -> usize {
        let mut items = self.items.lock().await;
        let count = items.len();
        items.clear();
        count
    }
}

/// Handle given to a connector at construction time for queueing bot replies
#[derive(Clone)]
pub struct QueueBotSays {
    queue: Arc<ReplyQueue>,
}

impl QueueBotSays {
    /// Create a handle backed by the given queue
    pub fn new(queue: Arc<ReplyQueue>) -> Self {
        Self { queue }
    }

    /// Queue a bot reply for the engine to consume
    pub async fn send(&self, msg: BotMessage) {
        self.queue.push(msg).await;
    }
}

/// Connector plugin metadata
#[derive(Debug, Clone)]
pub struct ConnectorMeta {
    /// Plugin contract version
    pub plugin_version: &'static str,
    pub name: String,
    pub description: String,
}

/// Trait implemented by bot connector plugins
///
/// Only `user_says` is mandatory; the lifecycle methods default to no-ops so
/// stateless connectors stay small.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connector metadata for diagnostics
    fn meta(&self) -> ConnectorMeta;

    /// Deliver an outbound message to the bot
    async fn user_says(&self, msg: &BotMessage) -> Result<(), EngineError>;

    /// Validate connector configuration
    async fn validate(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Prepare external resources before the first convo
    async fn build(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Start a conversation session
    async fn start(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Stop the conversation session
    async fn stop(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Release external resources
    async fn clean(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
