use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::intercept::CannedResponse;
use super::Conversation;
use crate::errors::ConversationResult;
use crate::models::content::{ContentBlock, ToolUseBlock};
use crate::models::message::Message;
use crate::tools::{Target, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    /// Requested by the backend, no result yet
    Pending,
    /// Result computed but not yet in the transcript
    Ready,
    /// Result handed to the client, which answers for it on a later turn
    AwaitingClient,
    /// Result appended to the transcript
    Resolved,
}

/// One tool use requested by the backend and its progress towards a result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub request: Value,
    pub response: Option<ToolOutput>,
    pub status: ToolStatus,
}

impl ToolRequest {
    fn from_block(block: &ToolUseBlock) -> Self {
        ToolRequest {
            id: block.id.clone(),
            name: block.name.clone(),
            request: block.input.clone(),
            response: None,
            status: ToolStatus::Pending,
        }
    }
}

/// Open tool requests plus an archive of resolved ones.
#[derive(Debug, Default, Clone)]
pub struct ToolLedger {
    open: Vec<ToolRequest>,
    archive: Vec<ToolRequest>,
}

impl ToolLedger {
    pub(crate) fn register(&mut self, block: &ToolUseBlock) {
        self.open.push(ToolRequest::from_block(block));
    }

    pub(crate) fn mark_ready(&mut self, id: &str, output: ToolOutput) {
        self.record(id, output, ToolStatus::Ready);
    }

    pub(crate) fn mark_awaiting_client(&mut self, id: &str, output: ToolOutput) {
        self.record(id, output, ToolStatus::AwaitingClient);
    }

    fn record(&mut self, id: &str, output: ToolOutput, status: ToolStatus) {
        if let Some(request) = self.open.iter_mut().find(|r| r.id == id) {
            request.response = Some(output);
            request.status = status;
        }
    }

    pub fn is_ready(&self, id: &str) -> bool {
        self.open
            .iter()
            .any(|r| r.id == id && r.status == ToolStatus::Ready)
    }

    /// The client moved on without answering: what it was shown becomes
    /// the result, so the transcript never holds an unanswered tool use.
    pub(crate) fn settle_client_requests(&mut self) {
        for request in self
            .open
            .iter_mut()
            .filter(|r| r.status == ToolStatus::AwaitingClient)
        {
            debug!(id = %request.id, "client did not answer tool use, settling with its output");
            request.status = ToolStatus::Ready;
        }
    }

    /// Tool result blocks for every Ready request. The requests are marked
    /// Resolved and archived, so the caller must append the blocks to the
    /// transcript straight away.
    pub(crate) fn take_ready(&mut self) -> Vec<ContentBlock> {
        let (ready, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.open)
            .into_iter()
            .partition(|r| r.status == ToolStatus::Ready);
        self.open = open;

        ready
            .into_iter()
            .map(|mut request| {
                let content = request
                    .response
                    .as_ref()
                    .map(ToolOutput::text)
                    .unwrap_or_default();
                let block = ContentBlock::tool_result(&request.id, content);
                request.status = ToolStatus::Resolved;
                self.archive.push(request);
                block
            })
            .collect()
    }

    /// Record that a result for `id` reached the transcript some other way,
    /// such as a reconnect message from the client.
    pub(crate) fn resolve_external(&mut self, id: &str) {
        if let Some(pos) = self.open.iter().position(|r| r.id == id) {
            let mut request = self.open.remove(pos);
            request.status = ToolStatus::Resolved;
            self.archive.push(request);
        }
    }

    pub fn open(&self) -> &[ToolRequest] {
        &self.open
    }

    pub fn resolved(&self) -> &[ToolRequest] {
        &self.archive
    }
}

pub(crate) enum DispatchOutcome {
    /// Every result was fed back; call the backend again
    Continue,
    /// At least one client-targeted tool ended the turn
    Client(CannedResponse),
}

impl Conversation {
    /// Run every tool use in `reply`, which is already in the transcript.
    ///
    /// Model-targeted results are held until the next user message carries
    /// them. If any tool addressed the client, the turn ends with the client
    /// texts once all tools have run.
    pub(crate) fn dispatch_tools(&mut self, reply: &Message) -> ConversationResult<DispatchOutcome> {
        let requests = reply.tool_uses();
        for block in &requests {
            self.tools.register(block);
        }

        let bot = Arc::clone(&self.bot);
        let mut for_client = Vec::new();
        for block in requests {
            debug!(tool = %block.name, id = %block.id, "dispatching tool use");
            let output = bot.execute_tool(block)?;
            match output.target {
                Target::Model => self.tools.mark_ready(&block.id, output),
                Target::Client => {
                    for_client.push(output.text());
                    self.tools.mark_awaiting_client(&block.id, output);
                }
            }
        }

        if !for_client.is_empty() {
            debug!(count = for_client.len(), "tool results addressed to client, ending turn");
            return Ok(DispatchOutcome::Client(CannedResponse::new(
                for_client.join("\n"),
                false,
            )));
        }

        self.append_user(Message::user());
        Ok(DispatchOutcome::Continue)
    }
}
