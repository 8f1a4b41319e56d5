use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::content::{ContentBlock, ToolUseBlock};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// System prompt as sent to a backend: plain text, or a list of text segments
/// that may carry their own cache markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Segments(Vec<ContentBlock>),
}

impl Default for SystemPrompt {
    fn default() -> Self {
        SystemPrompt::Text(String::new())
    }
}

impl SystemPrompt {
    pub fn is_empty(&self) -> bool {
        match self {
            SystemPrompt::Text(text) => text.is_empty(),
            SystemPrompt::Segments(segments) => segments.is_empty(),
        }
    }

    /// All segment text joined together, for logging and display
    pub fn text(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Segments(segments) => segments
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Everything a backend needs for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system: SystemPrompt,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
}

/// One increment of a streamed assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(String),
    /// A tool use, delivered once its input has been received in full
    ToolUse(ToolUseBlock),
}

/// Increments of a blocking streaming call
pub type Increments = Box<dyn Iterator<Item = Result<StreamEvent>> + Send>;

/// Increments of an async streaming call
pub type IncrementStream = BoxStream<'static, Result<StreamEvent>>;

/// Cooperative backend, driven from an async runtime
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate one complete assistant message
    async fn complete(&self, request: CompletionRequest) -> Result<Message>;

    /// Open a stream of increments for one assistant message
    async fn stream(&self, request: CompletionRequest) -> Result<IncrementStream>;
}

/// Backend whose calls block the calling thread
pub trait BlockingProvider: Send + Sync {
    /// Generate one complete assistant message
    fn complete(&self, request: CompletionRequest) -> Result<Message>;

    /// Open a stream of increments for one assistant message
    fn stream(&self, request: CompletionRequest) -> Result<Increments>;
}

/// The backend a conversation is bound to. The variant fixes the execution
/// model: blocking conversations are driven with `resume`, async ones with
/// `aresume`.
#[derive(Clone)]
pub enum Client {
    Blocking(Arc<dyn BlockingProvider>),
    Async(Arc<dyn Provider>),
}

impl Client {
    pub fn blocking<P: BlockingProvider + 'static>(provider: P) -> Self {
        Client::Blocking(Arc::new(provider))
    }

    pub fn asynchronous<P: Provider + 'static>(provider: P) -> Self {
        Client::Async(Arc::new(provider))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Client::Async(_))
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Client::Blocking(_) => "sync",
            Client::Async(_) => "async",
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client::{}", self.mode())
    }
}
