use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;

use super::base::{BlockingProvider, CompletionRequest, IncrementStream, Increments, Provider};
use super::configs::{AnthropicProviderConfig, ANTHROPIC_VERSION};
use super::utils::{request_payload, response_to_message, SseParser};
use crate::models::message::Message;

fn status_error(status: StatusCode, body: String) -> anyhow::Error {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        anyhow!("Server error: {}", status)
    } else {
        anyhow!("Request failed: {} - {}", status, body)
    }
}

/// Anthropic Messages API backend for async conversations
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, payload: Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status => Err(status_error(status, response.text().await?)),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Message> {
        let payload = request_payload(&request, false)?;
        let response: Value = self.post(payload).await?.json().await?;
        response_to_message(&response)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<IncrementStream> {
        let payload = request_payload(&request, true)?;
        let mut bytes = self.post(payload).await?.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            let mut parser = SseParser::default();
            // bytes, so a character split across chunks is decoded whole
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(anyhow::Error::from(err));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);
                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    if let Some(increment) = parser.line(String::from_utf8_lossy(&line).trim_end()) {
                        yield increment;
                    }
                }
            }
            if let Some(increment) = parser.line(String::from_utf8_lossy(&buffer).trim_end()) {
                yield increment;
            }
        }))
    }
}

/// Anthropic Messages API backend for blocking conversations.
///
/// Must not be created or dropped inside an async runtime.
pub struct BlockingAnthropicProvider {
    client: reqwest::blocking::Client,
    config: AnthropicProviderConfig,
}

impl BlockingAnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn post(&self, payload: Value) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status => Err(status_error(status, response.text()?)),
        }
    }
}

impl BlockingProvider for BlockingAnthropicProvider {
    fn complete(&self, request: CompletionRequest) -> Result<Message> {
        let payload = request_payload(&request, false)?;
        let response: Value = self.post(payload)?.json()?;
        response_to_message(&response)
    }

    fn stream(&self, request: CompletionRequest) -> Result<Increments> {
        let payload = request_payload(&request, true)?;
        let reader = BufReader::new(self.post(payload)?);
        let mut parser = SseParser::default();
        Ok(Box::new(reader.lines().filter_map(move |line| match line {
            Ok(line) => parser.line(&line),
            Err(err) => Some(Err(err.into())),
        })))
    }
}
