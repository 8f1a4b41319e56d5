pub mod chat;
pub mod check;
pub mod interlocute;
pub mod logs;

use anyhow::Result;
use robo::config::Settings;
use robo::providers::anthropic::AnthropicProvider;
use robo::{Client, ConversationOptions};

/// An async Anthropic client configured from `settings`
pub fn anthropic_client(settings: &Settings) -> Result<Client> {
    let provider = AnthropicProvider::new(settings.anthropic_config()?)?;
    Ok(Client::asynchronous(provider))
}

pub fn options(settings: &Settings, streaming: bool) -> ConversationOptions {
    ConversationOptions {
        streaming,
        ..Default::default()
    }
    .with_max_tool_rounds(settings.max_tool_rounds)
}
