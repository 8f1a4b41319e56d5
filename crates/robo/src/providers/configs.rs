pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Connection settings for the Anthropic Messages API. Model and sampling
/// settings travel with each request instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl AnthropicProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        AnthropicProviderConfig {
            host: ANTHROPIC_HOST.to_string(),
            api_key: api_key.into(),
            timeout_secs: 600,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.host.trim_end_matches('/'))
    }
}
