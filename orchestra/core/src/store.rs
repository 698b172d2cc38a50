//! Message Store
//!
//! The narrow mutation interface the orchestrator writes conversation
//! messages through. The surrounding application owns the real store; the
//! core only creates placeholders, patches them, finalizes them, and deletes
//! them.
//!
//! [`InMemoryMessageStore`] is the reference implementation used by the CLI
//! and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::ConversationId;
use crate::responder::ResponderId;

/// Opaque handle to a stored message
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub String);

impl MessageRef {
    /// Generate a new unique message reference
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }
}

impl Default for MessageRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message author
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// Responder output
    Assistant,
    /// System notice
    System,
}

/// Errors from store operations
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No message with this reference
    #[error("message {0} not found")]
    NotFound(MessageRef),

    /// The message was already finalized
    #[error("message {0} is already finalized")]
    AlreadyFinalized(MessageRef),

    /// The backing store rejected the write
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

/// Mutation interface used by the orchestrator
///
/// Each call must be applied atomically with respect to concurrent readers.
pub trait MessageStore: Send + Sync {
    /// Create an in-progress assistant message for a responder
    ///
    /// # Errors
    ///
    /// Fails when the store cannot accept writes.
    fn create_placeholder(
        &self,
        conversation_id: &ConversationId,
        responder: &ResponderId,
    ) -> Result<MessageRef, StoreError>;

    /// Replace a message's content
    ///
    /// # Errors
    ///
    /// Fails for unknown or finalized messages.
    fn patch_content(
        &self,
        message: &MessageRef,
        text: &str,
        in_progress: bool,
    ) -> Result<(), StoreError>;

    /// Write final content and metadata, clearing the in-progress flag
    ///
    /// # Errors
    ///
    /// Fails for unknown or already finalized messages.
    fn finalize(
        &self,
        message: &MessageRef,
        text: &str,
        token_count: u32,
        cost: f64,
    ) -> Result<(), StoreError>;

    /// Remove a message
    ///
    /// # Errors
    ///
    /// Fails for unknown messages.
    fn delete(&self, message: &MessageRef) -> Result<(), StoreError>;
}

/// A message as held by [`InMemoryMessageStore`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Reference
    pub id: MessageRef,
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Author
    pub role: MessageRole,
    /// Responder that produced it
    pub responder_id: Option<ResponderId>,
    /// Current content
    pub content: String,
    /// Still being written
    pub in_progress: bool,
    /// Generated tokens (finalized only)
    pub token_count: Option<u32>,
    /// Cost (finalized only)
    pub cost: Option<f64>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreInner {
    messages: HashMap<MessageRef, StoredMessage>,
    order: HashMap<ConversationId, Vec<MessageRef>>,
}

/// Ordered, append-and-patch store kept in memory
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryMessageStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user message
    pub fn push_user(&self, conversation_id: &ConversationId, text: &str) -> MessageRef {
        let now = Utc::now();
        let id = MessageRef::new();
        let message = StoredMessage {
            id: id.clone(),
            conversation_id: conversation_id.clone(),
            role: MessageRole::User,
            responder_id: None,
            content: text.to_string(),
            in_progress: false,
            token_count: None,
            cost: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write();
        inner
            .order
            .entry(conversation_id.clone())
            .or_default()
            .push(id.clone());
        inner.messages.insert(id.clone(), message);
        id
    }

    /// Messages of a conversation, in creation order
    #[must_use]
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<StoredMessage> {
        let inner = self.inner.read();
        inner
            .order
            .get(conversation_id)
            .map(|refs| {
                refs.iter()
                    .filter_map(|r| inner.messages.get(r).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up one message
    #[must_use]
    pub fn get(&self, message: &MessageRef) -> Option<StoredMessage> {
        self.inner.read().messages.get(message).cloned()
    }

    /// Total number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().messages.len()
    }

    /// Whether the store holds no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().messages.is_empty()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn create_placeholder(
        &self,
        conversation_id: &ConversationId,
        responder: &ResponderId,
    ) -> Result<MessageRef, StoreError> {
        let now = Utc::now();
        let id = MessageRef::new();
        let message = StoredMessage {
            id: id.clone(),
            conversation_id: conversation_id.clone(),
            role: MessageRole::Assistant,
            responder_id: Some(responder.clone()),
            content: String::new(),
            in_progress: true,
            token_count: None,
            cost: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write();
        inner
            .order
            .entry(conversation_id.clone())
            .or_default()
            .push(id.clone());
        inner.messages.insert(id.clone(), message);
        Ok(id)
    }

    fn patch_content(
        &self,
        message: &MessageRef,
        text: &str,
        in_progress: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let stored = inner
            .messages
            .get_mut(message)
            .ok_or_else(|| StoreError::NotFound(message.clone()))?;
        if !stored.in_progress {
            return Err(StoreError::AlreadyFinalized(message.clone()));
        }

        stored.content.clear();
        stored.content.push_str(text);
        stored.in_progress = in_progress;
        stored.updated_at = Utc::now();
        Ok(())
    }

    fn finalize(
        &self,
        message: &MessageRef,
        text: &str,
        token_count: u32,
        cost: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let stored = inner
            .messages
            .get_mut(message)
            .ok_or_else(|| StoreError::NotFound(message.clone()))?;
        if !stored.in_progress {
            return Err(StoreError::AlreadyFinalized(message.clone()));
        }

        stored.content = text.to_string();
        stored.in_progress = false;
        stored.token_count = Some(token_count);
        stored.cost = Some(cost);
        stored.updated_at = Utc::now();
        Ok(())
    }

    fn delete(&self, message: &MessageRef) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let removed = inner
            .messages
            .remove(message)
            .ok_or_else(|| StoreError::NotFound(message.clone()))?;
        if let Some(refs) = inner.order.get_mut(&removed.conversation_id) {
            refs.retain(|r| r != message);
        }
        Ok(())
    }
}
