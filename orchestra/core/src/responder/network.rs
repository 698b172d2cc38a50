//! Network Service Responder
//!
//! Auxiliary data services (weather, stock, news, search) answer a single
//! query in one response. The service is called with
//! `GET {endpoint}?q={query}&kind={kind}` and may reply with JSON carrying an
//! `answer`, `text` or `summary` field, or with plain text.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::traits::{AdapterError, ChunkSender, FinalPayload, Responder};
use crate::classifier::NetworkCommandKind;
use crate::request::Request;

const ANSWER_FIELDS: [&str; 3] = ["answer", "text", "summary"];

/// Single-shot network-service responder
#[derive(Clone)]
pub struct NetworkServiceResponder {
    command: NetworkCommandKind,
    endpoint: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for NetworkServiceResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServiceResponder")
            .field("command", &self.command)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl NetworkServiceResponder {
    /// Create a responder for one command kind
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidConfig`] if the HTTP client cannot be built.
    pub fn new(
        command: NetworkCommandKind,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, AdapterError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            command,
            endpoint: endpoint.into(),
            api_key,
            http_client,
        })
    }

    /// Command kind this service answers
    #[must_use]
    pub fn command(&self) -> NetworkCommandKind {
        self.command
    }

    fn get(&self) -> reqwest::RequestBuilder {
        let builder = self.http_client.get(&self.endpoint);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Pick the answer out of a service response body
fn extract_answer(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(answer) = ANSWER_FIELDS
            .iter()
            .find_map(|field| value.get(field).and_then(serde_json::Value::as_str))
        {
            return answer.trim().to_string();
        }
    }
    body.trim().to_string()
}

#[async_trait]
impl Responder for NetworkServiceResponder {
    fn name(&self) -> &str {
        self.command.as_str()
    }

    fn is_streaming(&self) -> bool {
        false
    }

    async fn health_check(&self) -> bool {
        self.get()
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| !r.status().is_server_error())
    }

    async fn stream(
        &self,
        request: &Request,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> Result<FinalPayload, AdapterError> {
        let call = async {
            let response = self
                .get()
                .query(&[("q", request.text.as_str()), ("kind", self.command.as_str())])
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(AdapterError::from_status(status, &body));
            }
            Ok::<_, AdapterError>(body)
        };

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            body = call => body?,
        };

        let answer = extract_answer(&body);
        if answer.is_empty() {
            return Err(AdapterError::ProviderUnavailable(format!(
                "{} service returned an empty answer",
                self.command
            )));
        }

        chunks.send(answer.clone()).await?;
        Ok(FinalPayload::text(answer))
    }
}
