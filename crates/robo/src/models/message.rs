use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::{ContentBlock, ToolResultBlock, ToolUseBlock};
use super::role::Role;

/// A message to or from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Message { role, content }
    }

    /// Create an empty user message
    pub fn user() -> Self {
        Message::new(Role::User, Vec::new())
    }

    /// Create an empty assistant message
    pub fn assistant() -> Self {
        Message::new(Role::Assistant, Vec::new())
    }

    /// Shorthand for a user message with a single text block
    pub fn user_text<S: Into<String>>(text: S) -> Self {
        Message::user().with_text(text)
    }

    /// Shorthand for an assistant message with a single text block
    pub fn assistant_text<S: Into<String>>(text: S) -> Self {
        Message::assistant().with_text(text)
    }

    /// A user message carrying one tool result for `tool_use_id`
    pub fn tool_result<I: Into<String>, C: Into<String>>(tool_use_id: I, content: C) -> Self {
        Message::user().with_tool_result(tool_use_id, content)
    }

    /// An assistant message carrying one tool use request
    pub fn tool_request<I: Into<String>, N: Into<String>>(id: I, name: N, input: Value) -> Self {
        Message::assistant().with_tool_use(id, name, input)
    }

    /// Add any ContentBlock to the message
    pub fn with_content(mut self, content: ContentBlock) -> Self {
        self.content.push(content);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(ContentBlock::text(text))
    }

    pub fn with_image<S: Into<String>, T: Into<String>>(self, media_type: S, data: T) -> Self {
        self.with_content(ContentBlock::image(media_type, data))
    }

    pub fn with_tool_use<I: Into<String>, N: Into<String>>(
        self,
        id: I,
        name: N,
        input: Value,
    ) -> Self {
        self.with_content(ContentBlock::tool_use(id, name, input))
    }

    pub fn with_tool_result<I: Into<String>, C: Into<String>>(
        self,
        tool_use_id: I,
        content: C,
    ) -> Self {
        self.with_content(ContentBlock::tool_result(tool_use_id, content))
    }

    /// Concatenated text of every text block, newline separated
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.content
            .iter()
            .filter_map(ContentBlock::as_tool_use)
            .collect()
    }

    pub fn tool_results(&self) -> Vec<&ToolResultBlock> {
        self.content
            .iter()
            .filter_map(ContentBlock::as_tool_result)
            .collect()
    }

    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, ContentBlock::ToolUse(_)))
    }

    /// An exhausted message is composed solely of text blocks, so nothing
    /// remains for the tool loop to resolve.
    pub fn is_exhausted(&self) -> bool {
        self.content
            .iter()
            .all(|c| matches!(c, ContentBlock::Text(_)))
    }
}
