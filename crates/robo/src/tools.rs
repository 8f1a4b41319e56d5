use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ConversationError, ConversationResult};
use crate::models::tool::Tool;

/// Who a tool result is addressed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// The result is fed back to the backend and the loop continues
    #[default]
    Model,
    /// The result ends the turn and goes straight back to the caller
    Client,
}

/// What a tool handler produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub message: Value,
    #[serde(default)]
    pub target: Target,
}

impl ToolOutput {
    pub fn model(message: impl Into<Value>) -> Self {
        ToolOutput {
            message: message.into(),
            target: Target::Model,
        }
    }

    pub fn client(message: impl Into<Value>) -> Self {
        ToolOutput {
            message: message.into(),
            target: Target::Client,
        }
    }

    /// The result as text: strings pass through, anything else is serialized
    pub fn text(&self) -> String {
        match &self.message {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Executes one named tool.
pub trait ToolHandler: Send + Sync {
    fn call(&self, input: &Value) -> Result<ToolOutput>;
}

impl<F> ToolHandler for F
where
    F: Fn(&Value) -> Result<ToolOutput> + Send + Sync,
{
    fn call(&self, input: &Value) -> Result<ToolOutput> {
        self(input)
    }
}

/// Tool schemas and their handlers, keyed by tool name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    handlers: HashMap<String, Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: ToolHandler + 'static>(
        &mut self,
        tool: Tool,
        handler: H,
    ) -> ConversationResult<()> {
        if self.handlers.contains_key(&tool.name) {
            return Err(ConversationError::DuplicateTool(tool.name));
        }
        self.handlers.insert(tool.name.clone(), Box::new(handler));
        self.tools.push(tool);
        Ok(())
    }

    /// Register a plain function or closure as the handler for `tool`
    pub fn register_fn<F>(&mut self, tool: Tool, handler: F) -> ConversationResult<()>
    where
        F: Fn(&Value) -> Result<ToolOutput> + Send + Sync + 'static,
    {
        self.register(tool, handler)
    }

    /// Schemas in registration order, as advertised to the backend
    pub fn schema(&self) -> &[Tool] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn execute(&self, name: &str, input: &Value) -> ConversationResult<ToolOutput> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ConversationError::ToolNotFound(name.to_string()))?;
        handler.call(input).map_err(ConversationError::ToolExecution)
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}
