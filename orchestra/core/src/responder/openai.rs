//! OpenAI-compatible Responder
//!
//! Model responder for any server speaking the OpenAI chat-completions
//! protocol (`POST {base}/chat/completions` with `"stream": true`).
//!
//! The response is Server-Sent Events. Every `data:` line holds a JSON chunk
//! whose `choices[0].delta.content` is the next fragment; the stream ends with
//! `data: [DONE]`. With `stream_options.include_usage` the server sends one
//! extra chunk carrying `usage` before `[DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::lines::LineBuffer;
use super::traits::{AdapterError, ChunkSender, FinalPayload, Responder, TokenUsage};
use crate::request::Request;

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<UsageBody>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// What one SSE line meant
enum SseEvent {
    /// Nothing to do (comment, blank, keep-alive, role-only delta)
    Skip,
    /// Text fragment, plus usage if the chunk carried it
    Chunk {
        content: Option<String>,
        usage: Option<TokenUsage>,
    },
    /// `[DONE]`
    Done,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Pull a readable message out of an error body
fn error_summary(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    value
        .pointer("/error/message")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        })
}

fn parse_sse_line(line: &str) -> Result<SseEvent, AdapterError> {
    let Some(payload) = extract_data_payload(line) else {
        return Ok(SseEvent::Skip);
    };
    if payload.is_empty() {
        return Ok(SseEvent::Skip);
    }
    if payload == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    match serde_json::from_str::<ChatChunk>(payload) {
        Ok(ChatChunk {
            error: Some(error), ..
        }) => {
            let message = error_summary(payload).unwrap_or_else(|| error.to_string());
            Err(AdapterError::ProviderUnavailable(message))
        }
        Ok(chunk) => {
            let usage = chunk.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            });
            let first = chunk.choices.into_iter().next();
            if let Some(reason) = first.as_ref().and_then(|c| c.finish_reason.as_deref()) {
                tracing::trace!(finish_reason = reason, "Chat completion finished");
            }
            let content = first.and_then(|c| c.delta.content);
            if content.is_none() && usage.is_none() {
                return Ok(SseEvent::Skip);
            }
            Ok(SseEvent::Chunk { content, usage })
        }
        Err(e) => match error_summary(payload) {
            Some(message) => Err(AdapterError::ProviderUnavailable(message)),
            None => {
                tracing::debug!(error = %e, "Skipping malformed SSE payload");
                Ok(SseEvent::Skip)
            }
        },
    }
}

/// OpenAI-compatible chat-completions responder
#[derive(Clone)]
pub struct OpenAiResponder {
    base_url: String,
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiResponder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiResponder {
    /// Create a responder
    ///
    /// `base_url` is the API root (e.g. `https://api.openai.com/v1`).
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidConfig`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, AdapterError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            http_client,
        })
    }

    /// Model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn build_body(&self, request: &Request) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": request.prompt_with_attachments(),
        }));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
            "temperature": request.params.temperature,
        });
        if let Some(max_tokens) = request.params.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    async fn apply_event(
        event: SseEvent,
        chunks: &ChunkSender,
        full_response: &mut String,
        usage: &mut Option<TokenUsage>,
    ) -> Result<bool, AdapterError> {
        match event {
            SseEvent::Skip => Ok(false),
            SseEvent::Done => Ok(true),
            SseEvent::Chunk { content, usage: u } => {
                if u.is_some() {
                    *usage = u;
                }
                if let Some(content) = content {
                    full_response.push_str(&content);
                    chunks.send(content).await?;
                }
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.models_url())
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn stream(
        &self,
        request: &Request,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> Result<FinalPayload, AdapterError> {
        let send = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&self.build_body(request))
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            response = send => response?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = error_summary(&body).unwrap_or(body);
            return Err(AdapterError::from_status(status, &detail));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = LineBuffer::new();
        let mut full_response = String::new();
        let mut usage = None;
        let mut done = false;

        while !done {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AdapterError::Cancelled),
                next = stream.next() => next,
            };
            let Some(bytes) = next else { break };
            buffer.push(&bytes?);

            while let Some(line) = buffer.next_line() {
                let event = parse_sse_line(line.trim())?;
                if Self::apply_event(event, &chunks, &mut full_response, &mut usage).await? {
                    done = true;
                    break;
                }
            }
        }

        if !done {
            if let Some(line) = buffer.finish() {
                let event = parse_sse_line(&line)?;
                done = Self::apply_event(event, &chunks, &mut full_response, &mut usage).await?;
            }
        }

        if !done {
            return Err(AdapterError::ProviderUnavailable(
                "stream ended before [DONE]".to_string(),
            ));
        }

        Ok(FinalPayload {
            text: full_response,
            usage,
            cost: None,
        })
    }
}
