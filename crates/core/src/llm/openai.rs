use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{config::AppConfig, error::GenerationError};

use super::{ChatMessage, ChatRequest, DeltaSink, Generator};

const MAX_ERROR_BODY: usize = 512;

/// Client for any OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Build a client for the configured endpoint, key and model.
    pub fn new(config: &AppConfig) -> Result<Self, GenerationError> {
        let http = Client::builder().gzip(true).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Model name sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<Response, GenerationError> {
        debug!(
            purpose = ?request.purpose,
            messages = request.messages.len(),
            stream,
            "sending generation request"
        );
        let body = CompletionBody {
            model: &self.model,
            messages: &request.messages,
            stream,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl Generator for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        let response = self.send(request, false).await?;
        let payload: CompletionResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::Decode(err.to_string()))?;
        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        info!(purpose = ?request.purpose, chars = text.chars().count(), "generation complete");
        Ok(text.trim().to_string())
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        sink: &DeltaSink,
    ) -> Result<String, GenerationError> {
        let mut response = self.send(request, true).await?;
        let mut events = SseBuffer::default();
        let mut assembled = String::new();

        while let Some(chunk) = response.chunk().await? {
            for delta in events.feed(&chunk) {
                let _ = sink.send(delta.clone());
                assembled.push_str(&delta);
            }
            if events.is_done() {
                break;
            }
        }

        if assembled.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        info!(purpose = ?request.purpose, chars = assembled.chars().count(), "stream complete");
        Ok(assembled)
    }
}

async fn ensure_success(response: Response) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GenerationError::Status {
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    })
}

/// Incremental decoder for `data:` server-sent events.
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network chunks are never mangled.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
    done: bool,
}

impl SseBuffer {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut deltas = Vec::new();

        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if self.done {
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                continue;
            }
            let Ok(event) = serde_json::from_str::<Value>(data) else {
                continue;
            };
            if let Some(delta) = event
                .get("choices")
                .and_then(|choices| choices.get(0))
                .and_then(|choice| choice.get("delta"))
                .and_then(|delta| delta.get("content"))
                .and_then(Value::as_str)
            {
                if !delta.is_empty() {
                    deltas.push(delta.to_string());
                }
            }
        }

        deltas
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
