//! Boundary to the text-generation service.

mod openai;

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::GenerationError;

pub use openai::OpenAiClient;

/// Channel receiving text fragments as they stream in.
pub type DeltaSink = mpsc::UnboundedSender<String>;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions.
    System,
    /// Player side and request text.
    User,
    /// Earlier model replies.
    Assistant,
}

/// One message of a chat-completion conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What a request is for. Only used for logging and test routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// The five-block tragedy.
    Story,
    /// Name extraction from the story.
    Cast,
    /// One reply to a player intervention.
    Intervention,
    /// The ending for the present timeline.
    Ending,
}

/// A complete request to the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    /// What the request is for.
    pub purpose: Purpose,
    /// Conversation sent to the model.
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Bundle `messages` for `purpose`.
    pub fn new(purpose: Purpose, messages: Vec<ChatMessage>) -> Self {
        Self { purpose, messages }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the full reply in one piece.
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError>;

    /// Generate the reply while forwarding fragments to `sink`, returning the
    /// assembled text. Backends without streaming send the whole reply once.
    async fn stream(
        &self,
        request: &ChatRequest,
        sink: &DeltaSink,
    ) -> Result<String, GenerationError> {
        let text = self.complete(request).await?;
        let _ = sink.send(text.clone());
        Ok(text)
    }
}

/// Bound a generation future by `limit`.
pub async fn with_timeout<F>(limit: Duration, call: F) -> Result<String, GenerationError>
where
    F: Future<Output = Result<String, GenerationError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| GenerationError::TimedOut(limit))?
}

/// Run `request` against `generator`, streaming into `sink` when one is given.
pub async fn generate(
    generator: &dyn Generator,
    request: &ChatRequest,
    sink: Option<&DeltaSink>,
    limit: Duration,
) -> Result<String, GenerationError> {
    let text = match sink {
        Some(sink) => with_timeout(limit, generator.stream(request, sink)).await?,
        None => with_timeout(limit, generator.complete(request)).await?,
    };
    if text.trim().is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Generator for Slow {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
            Ok(request
                .messages
                .last()
                .map(|message| message.content.clone())
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn timeout_maps_to_timed_out() {
        let request = ChatRequest::new(Purpose::Story, vec![ChatMessage::user("hi")]);
        let result = with_timeout(Duration::from_millis(10), Slow.complete(&request)).await;
        assert!(matches!(result, Err(GenerationError::TimedOut(_))));
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn default_stream_sends_whole_reply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = ChatRequest::new(Purpose::Story, vec![ChatMessage::user("전체")]);
        let text = Echo.stream(&request, &tx).await.unwrap();
        assert_eq!(text, "전체");
        assert_eq!(rx.recv().await.as_deref(), Some("전체"));
    }

    #[tokio::test]
    async fn blank_reply_is_empty_error() {
        let request = ChatRequest::new(Purpose::Ending, vec![ChatMessage::user("  ")]);
        let result = generate(&Echo, &request, None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GenerationError::Empty)));
        assert!(!result.unwrap_err().is_retryable());
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
    }
}
