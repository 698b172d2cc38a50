//! User Requests
//!
//! A [`Request`] is the immutable value produced by one user submission. The
//! orchestrator shares it between sessions behind an `Arc`, and derives new
//! values (for example with an expanded slash-command prompt) instead of
//! mutating it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::responder::ResponderId;

/// Conversation identifier
///
/// Opaque to the core; the surrounding application decides what it means.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Wrap an application-supplied conversation identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation parameters forwarded to model responders
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature (0.0-2.0)
    pub temperature: f32,
    /// Maximum tokens in the response (`None` = provider default)
    pub max_tokens: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// A pre-resolved text attachment
///
/// Files are read and converted to text before they reach the core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display name (usually the file name)
    pub name: String,
    /// Text content
    pub content: String,
}

impl Attachment {
    /// Create an attachment
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// One user submission
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Raw user text
    pub text: String,
    /// Conversation the response messages belong to
    pub conversation_id: ConversationId,
    /// Target responders (one for chat, several for comparison mode)
    pub responder_ids: Vec<ResponderId>,
    /// Optional system prompt
    pub system_prompt: Option<String>,
    /// Generation parameters
    pub params: GenerationParams,
    /// Pre-resolved text attachments
    pub attachments: Vec<Attachment>,
    /// Caller-supplied bound on each adapter call
    #[serde(default, with = "optional_millis")]
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request for a conversation
    pub fn new(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            conversation_id,
            responder_ids: Vec::new(),
            system_prompt: None,
            params: GenerationParams::default(),
            attachments: Vec::new(),
            timeout: None,
        }
    }

    /// Add a target responder
    #[must_use]
    pub fn with_responder(mut self, id: impl Into<ResponderId>) -> Self {
        self.responder_ids.push(id.into());
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = Some(max_tokens);
        self
    }

    /// Attach a text blob
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Bound every adapter call of this request
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Derive a copy whose text is replaced
    ///
    /// Used for expanded slash commands and for the query part of network
    /// commands. The original request is left untouched.
    #[must_use]
    pub fn derive_with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }

    /// User text with attachments appended as labelled context blocks
    #[must_use]
    pub fn prompt_with_attachments(&self) -> String {
        if self.attachments.is_empty() {
            return self.text.clone();
        }

        let mut prompt = self.text.clone();
        for attachment in &self.attachments {
            prompt.push_str("\n\n[Attachment: ");
            prompt.push_str(&attachment.name);
            prompt.push_str("]\n");
            prompt.push_str(&attachment.content);
        }
        prompt
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
