use serde::{Deserialize, Serialize};

use super::Conversation;
use crate::models::message::Message;

/// A reply produced without calling the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CannedResponse {
    pub text: String,
    /// Whether the text is also recorded in the transcript as an assistant turn
    pub include_in_context: bool,
}

impl CannedResponse {
    pub fn new(text: impl Into<String>, include_in_context: bool) -> Self {
        CannedResponse {
            text: text.into(),
            include_in_context,
        }
    }
}

/// What a preprocess hook decided about an incoming user message.
#[derive(Debug, Clone, PartialEq)]
pub enum Intercept {
    /// Send this message instead of the user's text
    Substitute(Message),
    /// Answer directly, skipping the backend
    Canned(CannedResponse),
}

impl Intercept {
    pub fn canned(text: impl Into<String>) -> Self {
        Intercept::Canned(CannedResponse::new(text, true))
    }

    /// A canned answer that is returned to the caller but not remembered
    pub fn canned_hidden(text: impl Into<String>) -> Self {
        Intercept::Canned(CannedResponse::new(text, false))
    }

    pub fn substitute(message: Message) -> Self {
        Intercept::Substitute(message)
    }
}

/// Hook evaluated before every turn.
pub trait Preprocess: Send + Sync {
    fn preprocess(&self, message: &str, conversation: &Conversation) -> Option<Intercept>;
}

impl<F> Preprocess for F
where
    F: Fn(&str, &Conversation) -> Option<Intercept> + Send + Sync,
{
    fn preprocess(&self, message: &str, conversation: &Conversation) -> Option<Intercept> {
        self(message, conversation)
    }
}

/// Turns messages that start with `prefix` into the tool result for every
/// tool use still waiting on the client, so a client that acted on a
/// client-targeted tool can hand control back to the backend.
#[derive(Debug, Clone)]
pub struct ReconnectOnPrefix {
    prefix: String,
}

impl ReconnectOnPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        ReconnectOnPrefix {
            prefix: prefix.into(),
        }
    }
}

impl Preprocess for ReconnectOnPrefix {
    fn preprocess(&self, message: &str, conversation: &Conversation) -> Option<Intercept> {
        let payload = message.strip_prefix(self.prefix.as_str())?.trim_start();
        let waiting = conversation.unanswered_tool_uses();
        if waiting.is_empty() {
            return None;
        }
        let reconnect = waiting
            .into_iter()
            .fold(Message::user(), |message, id| message.with_tool_result(id, payload));
        Some(Intercept::Substitute(reconnect))
    }
}
