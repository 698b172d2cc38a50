//! Ollama Responder
//!
//! Model responder for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/generate` - Generate completions, streamed as newline-delimited JSON
//! - `/api/tags` - List available models (used as the health check)
//!
//! Each NDJSON line carries a `response` fragment. The last line has
//! `"done": true` plus `eval_count` / `prompt_eval_count`, which become the
//! final usage figures.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::lines::LineBuffer;
use super::traits::{AdapterError, ChunkSender, FinalPayload, Responder, TokenUsage};
use crate::request::Request;

/// One NDJSON line of a `/api/generate` stream
#[derive(Debug, Default, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

/// Ollama responder
#[derive(Clone, Debug)]
pub struct OllamaResponder {
    /// Server base URL (e.g. `http://localhost:11434`)
    base_url: String,
    /// Model to generate with
    model: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaResponder {
    /// Create a responder for one model on one server
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidConfig`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, AdapterError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http_client,
        })
    }

    /// Model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// Build the full prompt including system prompt and attachments
    fn build_prompt(request: &Request) -> String {
        let mut full_prompt = String::new();

        if let Some(ref system) = request.system_prompt {
            full_prompt.push_str(system);
            full_prompt.push_str("\n\n");
        }

        full_prompt.push_str(&request.prompt_with_attachments());
        full_prompt
    }

    fn build_body(&self, request: &Request) -> serde_json::Value {
        let mut options = serde_json::json!({
            "temperature": request.params.temperature,
        });
        if let Some(max_tokens) = request.params.max_tokens {
            options["num_predict"] = serde_json::json!(max_tokens);
        }

        serde_json::json!({
            "model": self.model,
            "prompt": Self::build_prompt(request),
            "stream": true,
            "options": options,
        })
    }

    /// Handle one NDJSON line; returns `true` once the stream is done
    async fn handle_line(
        line: &str,
        chunks: &ChunkSender,
        full_response: &mut String,
        usage: &mut Option<TokenUsage>,
    ) -> Result<bool, AdapterError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }

        let data: GenerateLine = match serde_json::from_str(line) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed Ollama line");
                return Ok(false);
            }
        };

        if let Some(error) = data.error {
            return Err(AdapterError::ProviderUnavailable(error));
        }

        if !data.response.is_empty() {
            full_response.push_str(&data.response);
            chunks.send(data.response).await?;
        }

        if data.done {
            *usage = Some(TokenUsage {
                prompt_tokens: data.prompt_eval_count.unwrap_or(0),
                completion_tokens: data.eval_count.unwrap_or(0),
            });
        }
        Ok(data.done)
    }
}

#[async_trait]
impl Responder for OllamaResponder {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
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
            .post(self.generate_url())
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
            return Err(AdapterError::from_status(status, &body));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = LineBuffer::new();
        let mut full_response = String::new();
        let mut usage = None;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AdapterError::Cancelled),
                next = stream.next() => next,
            };
            let Some(bytes) = next else { break };
            buffer.push(&bytes?);

            while let Some(line) = buffer.next_line() {
                if Self::handle_line(&line, &chunks, &mut full_response, &mut usage).await? {
                    return Ok(FinalPayload {
                        text: full_response,
                        usage,
                        cost: None,
                    });
                }
            }
        }

        // Stream ended without a trailing newline or done signal
        if let Some(line) = buffer.finish() {
            Self::handle_line(&line, &chunks, &mut full_response, &mut usage).await?;
        }

        if full_response.is_empty() && usage.is_none() {
            return Err(AdapterError::ProviderUnavailable(
                "Ollama closed the stream without a response".to_string(),
            ));
        }

        Ok(FinalPayload {
            text: full_response,
            usage,
            cost: None,
        })
    }
}
