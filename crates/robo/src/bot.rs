use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::intercept::{Intercept, Preprocess};
use crate::conversation::Conversation;
use crate::errors::ConversationResult;
use crate::models::content::{CacheControl, ContentBlock, ToolUseBlock};
use crate::models::tool::Tool;
use crate::prompt_template::{self, Argv};
use crate::providers::base::SystemPrompt;
use crate::tools::{ToolHandler, ToolOutput, ToolRegistry};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 20000;

fn default_name() -> String {
    "Bot".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

/// Static settings of a bot. Every field has a default, so a config file
/// only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Send only the newest message to the backend on each call
    #[serde(default)]
    pub oneshot: bool,
    #[serde(default)]
    pub welcome_message: Option<String>,
    /// Seed a fresh transcript with `welcome_message` as if the bot spoke first
    #[serde(default)]
    pub soft_start: bool,
    #[serde(default)]
    pub cache_user_prompt: bool,
    /// Placeholder names bound, in order, to a conversation's argv
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            name: default_name(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            oneshot: false,
            welcome_message: None,
            soft_start: false,
            cache_user_prompt: false,
            fields: Vec::new(),
        }
    }
}

/// Where a bot's system prompt template comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptSource {
    Text(String),
    /// Read on every prestart, so edits to the file apply to new and revived
    /// conversations.
    File(PathBuf),
    Segments(Vec<ContentBlock>),
}

impl Default for PromptSource {
    fn default() -> Self {
        PromptSource::Text(String::new())
    }
}

/// A system prompt segment, optionally marked for prompt caching
pub fn sysprompt_segment(text: impl Into<String>, cache: bool) -> ContentBlock {
    let mut block = ContentBlock::text(text);
    if cache {
        block.set_cache_control(Some(CacheControl::Ephemeral));
    }
    block
}

/// The capability provider a conversation talks through: prompt, tools and
/// an optional hook that runs before every turn.
#[derive(Default)]
pub struct Bot {
    config: BotConfig,
    prompt: PromptSource,
    tools: ToolRegistry,
    preprocessor: Option<Box<dyn Preprocess>>,
}

impl Bot {
    pub fn new(config: BotConfig) -> Self {
        Bot {
            config,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, text: impl Into<String>) -> Self {
        self.prompt = PromptSource::Text(text.into());
        self
    }

    pub fn with_prompt_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompt = PromptSource::File(path.into());
        self
    }

    pub fn with_prompt_segments(mut self, segments: Vec<ContentBlock>) -> Self {
        self.prompt = PromptSource::Segments(segments);
        self
    }

    pub fn with_tool<H: ToolHandler + 'static>(
        mut self,
        tool: Tool,
        handler: H,
    ) -> ConversationResult<Self> {
        self.tools.register(tool, handler)?;
        Ok(self)
    }

    pub fn with_tool_fn<F>(mut self, tool: Tool, handler: F) -> ConversationResult<Self>
    where
        F: Fn(&Value) -> anyhow::Result<ToolOutput> + Send + Sync + 'static,
    {
        self.tools.register_fn(tool, handler)?;
        Ok(self)
    }

    pub fn with_preprocessor<P: Preprocess + 'static>(mut self, preprocessor: P) -> Self {
        self.preprocessor = Some(Box::new(preprocessor));
        self
    }

    /// Like `with_preprocessor`, for closures
    pub fn with_preprocess_fn<F>(self, preprocess: F) -> Self
    where
        F: Fn(&str, &Conversation) -> Option<Intercept> + Send + Sync + 'static,
    {
        self.with_preprocessor(preprocess)
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn prompt_source(&self) -> &PromptSource {
        &self.prompt
    }

    /// The system prompt before any field substitution
    pub fn system_prompt_template(&self) -> ConversationResult<SystemPrompt> {
        Ok(match &self.prompt {
            PromptSource::Text(text) => SystemPrompt::Text(text.clone()),
            PromptSource::File(path) => SystemPrompt::Text(prompt_template::load_prompt_file(path)?),
            PromptSource::Segments(segments) => SystemPrompt::Segments(segments.clone()),
        })
    }

    pub fn resolved_system_prompt(&self, argv: &Argv) -> ConversationResult<SystemPrompt> {
        let bindings = argv.bind(&self.config.fields)?;
        let template = self.system_prompt_template()?;
        Ok(prompt_template::render_system_prompt(&template, &bindings))
    }

    /// Tool schemas advertised to the backend; empty when the bot has no tools
    pub fn tool_schema(&self) -> &[Tool] {
        self.tools.schema()
    }

    pub fn execute_tool(&self, request: &ToolUseBlock) -> ConversationResult<ToolOutput> {
        self.tools.execute(&request.name, &request.input)
    }

    pub fn preprocess(&self, message: &str, conversation: &Conversation) -> Option<Intercept> {
        self.preprocessor
            .as_ref()
            .and_then(|p| p.preprocess(message, conversation))
    }

    /// The welcome message to seed a fresh transcript with, if soft start applies
    pub fn soft_start_message(&self) -> Option<&str> {
        if self.config.soft_start {
            self.config.welcome_message.as_deref()
        } else {
            None
        }
    }
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("config", &self.config)
            .field("prompt", &self.prompt)
            .field("tools", &self.tools)
            .field("preprocessor", &self.preprocessor.is_some())
            .finish()
    }
}
