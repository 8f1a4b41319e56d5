use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::message::Message;
use crate::models::role::Role;
use crate::providers::base::{
    BlockingProvider, CompletionRequest, IncrementStream, Increments, Provider, StreamEvent,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A scripted backend for tests and offline use.
///
/// Replies come from, in order: the queue of pre-configured responses, a
/// scenario keyed by the newest user text, then a default that echoes the
/// user's text or the content of a tool result. Streamed replies deliver
/// their text word by word, then their tool uses.
#[derive(Clone, Default)]
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<Message>>>,
    scenarios: Arc<Mutex<HashMap<String, Message>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    calls: Arc<AtomicUsize>,
    fail_stream_after: Option<usize>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Default::default()
        }
    }

    /// Answer `reply` whenever the newest user text is exactly `input`
    pub fn with_scenario(self, input: impl Into<String>, reply: Message) -> Self {
        lock(&self.scenarios).insert(input.into(), reply);
        self
    }

    /// Fail streaming calls with an error after `chunks` increments
    pub fn with_stream_failure_after(mut self, chunks: usize) -> Self {
        self.fail_stream_after = Some(chunks);
        self
    }

    pub fn push_response(&self, message: Message) {
        lock(&self.responses).push_back(message);
    }

    /// Number of backend calls made so far, flat and streaming
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.requests).last().cloned()
    }

    fn reply(&self, request: &CompletionRequest) -> Message {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        if let Some(queued) = lock(&self.responses).pop_front() {
            return queued;
        }

        let Some(last) = request.messages.last().filter(|m| m.role == Role::User) else {
            return Message::assistant_text("");
        };
        if let Some(result) = last.tool_results().first() {
            return Message::assistant_text(format!("Tool response was:{}", result.content));
        }

        let text = last.text();
        if let Some(reply) = lock(&self.scenarios).get(&text) {
            return reply.clone();
        }
        Message::assistant_text(format!("I understand you said: '{text}'"))
    }

    /// The reply as word increments, then one event per tool use
    fn increments(&self, request: &CompletionRequest) -> Vec<Result<StreamEvent>> {
        let reply = self.reply(request);
        let mut chunks: Vec<Result<StreamEvent>> = split_increments(&reply.text())
            .into_iter()
            .map(|chunk| Ok(StreamEvent::Text(chunk)))
            .chain(
                reply
                    .tool_uses()
                    .into_iter()
                    .map(|tool_use| Ok(StreamEvent::ToolUse(tool_use.clone()))),
            )
            .collect();
        if let Some(after) = self.fail_stream_after {
            chunks.truncate(after);
            chunks.push(Err(anyhow!("mock stream interrupted")));
        }
        chunks
    }
}

/// Split text into word-sized increments, keeping the separating spaces
fn split_increments(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Message> {
        Ok(self.reply(&request))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<IncrementStream> {
        let chunks = self.increments(&request);
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

impl BlockingProvider for MockProvider {
    fn complete(&self, request: CompletionRequest) -> Result<Message> {
        Ok(self.reply(&request))
    }

    fn stream(&self, request: CompletionRequest) -> Result<Increments> {
        let chunks = self.increments(&request);
        Ok(Box::new(chunks.into_iter()))
    }
}
