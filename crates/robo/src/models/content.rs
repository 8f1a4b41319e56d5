use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prompt-caching marker attached to the outgoing copy of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheControl {
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Base64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaBlock {
    pub source: MediaSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

/// One typed unit of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Image(MediaBlock),
    Document(MediaBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    /// Any block kind this crate does not model (thinking, server tools, ...)
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentBlock::Text(TextBlock {
            text: text.into(),
            cache_control: None,
        })
    }

    pub fn image<S: Into<String>, T: Into<String>>(media_type: S, data: T) -> Self {
        ContentBlock::Image(MediaBlock::base64(media_type, data))
    }

    pub fn document<S: Into<String>, T: Into<String>>(media_type: S, data: T) -> Self {
        ContentBlock::Document(MediaBlock::base64(media_type, data))
    }

    pub fn tool_use<I: Into<String>, N: Into<String>>(id: I, name: N, input: Value) -> Self {
        ContentBlock::ToolUse(ToolUseBlock {
            id: id.into(),
            name: name.into(),
            input,
            cache_control: None,
        })
    }

    pub fn tool_result<I: Into<String>, C: Into<String>>(tool_use_id: I, content: C) -> Self {
        ContentBlock::ToolResult(ToolResultBlock {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            cache_control: None,
        })
    }

    /// Wire name of the block kind, as used in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text(_) => "text",
            ContentBlock::Image(_) => "image",
            ContentBlock::Document(_) => "document",
            ContentBlock::ToolUse(_) => "tool_use",
            ContentBlock::ToolResult(_) => "tool_result",
            ContentBlock::Unsupported => "unsupported",
        }
    }

    /// Get the text content if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUseBlock> {
        if let ContentBlock::ToolUse(ref tool_use) = self {
            Some(tool_use)
        } else {
            None
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultBlock> {
        if let ContentBlock::ToolResult(ref tool_result) = self {
            Some(tool_result)
        } else {
            None
        }
    }

    pub fn cache_control(&self) -> Option<CacheControl> {
        match self {
            ContentBlock::Text(block) => block.cache_control,
            ContentBlock::Image(block) | ContentBlock::Document(block) => block.cache_control,
            ContentBlock::ToolUse(block) => block.cache_control,
            ContentBlock::ToolResult(block) => block.cache_control,
            ContentBlock::Unsupported => None,
        }
    }

    pub fn set_cache_control(&mut self, marker: Option<CacheControl>) {
        match self {
            ContentBlock::Text(block) => block.cache_control = marker,
            ContentBlock::Image(block) | ContentBlock::Document(block) => {
                block.cache_control = marker
            }
            ContentBlock::ToolUse(block) => block.cache_control = marker,
            ContentBlock::ToolResult(block) => block.cache_control = marker,
            ContentBlock::Unsupported => {}
        }
    }
}

impl MediaBlock {
    pub fn base64<S: Into<String>, T: Into<String>>(media_type: S, data: T) -> Self {
        MediaBlock {
            source: MediaSource {
                kind: SourceKind::Base64,
                media_type: media_type.into(),
                data: data.into(),
            },
            cache_control: None,
        }
    }
}
