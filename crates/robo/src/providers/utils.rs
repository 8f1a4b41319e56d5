use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::models::content::{ContentBlock, ToolUseBlock};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::providers::base::{CompletionRequest, StreamEvent};

/// Build the Messages API request body
pub fn request_payload(request: &CompletionRequest, stream: bool) -> Result<Value> {
    let mut payload = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "messages": serde_json::to_value(&request.messages)?,
    });

    let body = payload
        .as_object_mut()
        .ok_or_else(|| anyhow!("request payload is not an object"))?;
    if !request.system.is_empty() {
        body.insert("system".to_string(), serde_json::to_value(&request.system)?);
    }
    if !request.tools.is_empty() {
        body.insert("tools".to_string(), serde_json::to_value(&request.tools)?);
    }
    if stream {
        body.insert("stream".to_string(), json!(true));
    }
    Ok(payload)
}

/// Convert a Messages API response body into an assistant message
pub fn response_to_message(response: &Value) -> Result<Message> {
    let blocks = response
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid response format from Anthropic API"))?;

    let mut content = Vec::with_capacity(blocks.len());
    for block in blocks {
        let parsed: ContentBlock = serde_json::from_value(block.clone())?;
        if parsed == ContentBlock::Unsupported {
            debug!(kind = ?block.get("type"), "response carried an unsupported block");
        }
        content.push(parsed);
    }
    Ok(Message::new(Role::Assistant, content))
}

/// The JSON payload of an SSE `data:` line, if the line is one
pub fn sse_data(line: &str) -> Option<Result<Value>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    Some(serde_json::from_str(data).map_err(Into::into))
}

fn str_field<'v>(value: &'v Value, pointer: &str) -> Option<&'v str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// A tool use whose input is still arriving as JSON fragments
#[derive(Debug)]
struct PartialToolUse {
    id: String,
    name: String,
    input_json: String,
}

impl PartialToolUse {
    fn finish(self) -> Result<ToolUseBlock> {
        let input = if self.input_json.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.input_json)?
        };
        Ok(ToolUseBlock {
            id: self.id,
            name: self.name,
            input,
            cache_control: None,
        })
    }
}

/// Turns Messages API SSE lines into stream events.
///
/// Text deltas pass straight through. A tool use is assembled from its
/// `input_json_delta` fragments and emitted when its block stops. Block and
/// delta kinds with no event of their own fail the stream.
#[derive(Debug, Default)]
pub struct SseParser {
    tool_uses: HashMap<u64, PartialToolUse>,
    emitted_tool_use: bool,
}

impl SseParser {
    /// Event for one SSE line, if it carries one
    pub fn line(&mut self, line: &str) -> Option<Result<StreamEvent>> {
        match sse_data(line)? {
            Ok(event) => self.event(&event).transpose(),
            Err(err) => Some(Err(err)),
        }
    }

    pub fn event(&mut self, event: &Value) -> Result<Option<StreamEvent>> {
        let index = event.get("index").and_then(Value::as_u64).unwrap_or_default();
        match str_field(event, "/type") {
            Some("content_block_start") => {
                let block = event.get("content_block").unwrap_or(&Value::Null);
                match str_field(block, "/type") {
                    Some("text") => Ok(str_field(block, "/text")
                        .filter(|text| !text.is_empty())
                        .map(|text| StreamEvent::Text(text.to_string()))),
                    Some("tool_use") => {
                        let (Some(id), Some(name)) = (str_field(block, "/id"), str_field(block, "/name")) else {
                            return Err(anyhow!("tool_use block without an id or name"));
                        };
                        self.tool_uses.insert(
                            index,
                            PartialToolUse {
                                id: id.to_string(),
                                name: name.to_string(),
                                input_json: String::new(),
                            },
                        );
                        Ok(None)
                    }
                    kind => Err(anyhow!(
                        "Unrecognized content block in stream: {}",
                        kind.unwrap_or("unknown")
                    )),
                }
            }
            Some("content_block_delta") => match str_field(event, "/delta/type") {
                Some("text_delta") => Ok(str_field(event, "/delta/text")
                    .map(|text| StreamEvent::Text(text.to_string()))),
                Some("input_json_delta") => {
                    let partial = self
                        .tool_uses
                        .get_mut(&index)
                        .ok_or_else(|| anyhow!("input_json_delta for block {index}, which is not a tool use"))?;
                    partial
                        .input_json
                        .push_str(str_field(event, "/delta/partial_json").unwrap_or_default());
                    Ok(None)
                }
                kind => Err(anyhow!(
                    "Unrecognized delta in stream: {}",
                    kind.unwrap_or("unknown")
                )),
            },
            Some("content_block_stop") => match self.tool_uses.remove(&index) {
                Some(partial) => {
                    self.emitted_tool_use = true;
                    Ok(Some(StreamEvent::ToolUse(partial.finish()?)))
                }
                None => Ok(None),
            },
            Some("message_delta") => {
                if str_field(event, "/delta/stop_reason") == Some("tool_use") && !self.emitted_tool_use {
                    return Err(anyhow!("Stream stopped for tool use without a complete tool_use block"));
                }
                Ok(None)
            }
            Some("error") => Err(anyhow!(
                "Stream error: {}",
                str_field(event, "/error/message").unwrap_or("unknown error")
            )),
            _ => Ok(None),
        }
    }
}
