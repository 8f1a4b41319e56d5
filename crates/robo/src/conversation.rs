use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

pub mod context;
pub mod dispatch;
pub mod intercept;
pub mod response;
pub mod stream;

use crate::attachments::{compile_user_message, FileSpec};
use crate::bot::Bot;
use crate::errors::{ConversationError, ConversationResult};
use crate::models::content::ContentBlock;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::prompt_template::{placeholders, Argv};
use crate::providers::base::{
    BlockingProvider, Client, CompletionRequest, Provider, SystemPrompt,
};

use dispatch::{DispatchOutcome, ToolLedger};
use intercept::{CannedResponse, Intercept};
use response::Response;
use stream::{AsyncStreamAccumulator, StreamAccumulator};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;

/// Per-conversation mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationOptions {
    /// Turns are driven through `resume_stream`/`aresume_stream`
    pub streaming: bool,
    /// Mark the newest block of every outgoing context for prompt caching
    pub cache_user_prompt: bool,
    /// Backend round-trips a single turn may spend resolving tool uses
    pub max_tool_rounds: usize,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        ConversationOptions {
            streaming: false,
            cache_user_prompt: false,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

impl ConversationOptions {
    pub fn streaming() -> Self {
        ConversationOptions {
            streaming: true,
            ..Default::default()
        }
    }

    pub fn with_cache_user_prompt(mut self, cache_user_prompt: bool) -> Self {
        self.cache_user_prompt = cache_user_prompt;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }
}

/// Hook run after every completed turn.
pub type TurnCallback = Box<dyn FnMut(&Conversation, &Response) -> anyhow::Result<()> + Send>;

pub(crate) enum TurnStart {
    Proceed,
    Canned(CannedResponse),
}

/// The transcript length and tool ledger from before a turn began.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint {
    messages: usize,
    tools: ToolLedger,
}

/// A multi-turn exchange between a caller and a backend, spoken through a bot.
///
/// The conversation owns its transcript. Every turn operation takes `&mut self`,
/// so one conversation can only ever have one turn in flight.
pub struct Conversation {
    bot: Arc<Bot>,
    client: Client,
    options: ConversationOptions,
    messages: Vec<Message>,
    system_prompt: Option<SystemPrompt>,
    argv: Argv,
    started: bool,
    tools: ToolLedger,
    callbacks: Vec<TurnCallback>,
}

impl Conversation {
    pub fn new(bot: impl Into<Arc<Bot>>, client: Client) -> Self {
        Self::with_options(bot, client, ConversationOptions::default())
    }

    pub fn with_options(
        bot: impl Into<Arc<Bot>>,
        client: Client,
        options: ConversationOptions,
    ) -> Self {
        Conversation {
            bot: bot.into(),
            client,
            options,
            messages: Vec::new(),
            system_prompt: None,
            argv: Argv::none(),
            started: false,
            tools: ToolLedger::default(),
            callbacks: Vec::new(),
        }
    }

    /// Construct and prestart in one step
    pub fn started_with(
        bot: impl Into<Arc<Bot>>,
        client: Client,
        options: ConversationOptions,
        argv: impl Into<Argv>,
    ) -> ConversationResult<Self> {
        let mut conversation = Self::with_options(bot, client, options);
        conversation.prestart(argv)?;
        Ok(conversation)
    }

    /// Replace the transcript of a conversation that has not started yet
    pub fn restore(&mut self, messages: Vec<Message>) -> ConversationResult<()> {
        if self.started {
            return Err(ConversationError::AlreadyStarted);
        }
        self.messages = messages;
        Ok(())
    }

    /// Resolve the system prompt for `argv` and mark the conversation started,
    /// without sending anything.
    pub fn prestart(&mut self, argv: impl Into<Argv>) -> ConversationResult<&mut Self> {
        let argv = argv.into();
        let prompt = self.bot.resolved_system_prompt(&argv)?;

        let unbound = placeholders(&prompt.text());
        if !unbound.is_empty() {
            debug!(fields = ?unbound, "system prompt placeholders left unbound");
        }

        if self.messages.is_empty() {
            if let Some(welcome) = self.bot.soft_start_message() {
                self.messages.push(Message::assistant_text(welcome));
            }
        }

        self.system_prompt = Some(prompt);
        self.argv = argv;
        self.started = true;
        debug!(bot = %self.bot.name(), "conversation prestarted");
        Ok(self)
    }

    pub fn start(&mut self, argv: impl Into<Argv>, message: &str) -> ConversationResult<Response> {
        self.ensure_not_started()?;
        self.prestart(argv)?;
        self.resume(message)
    }

    pub async fn astart(
        &mut self,
        argv: impl Into<Argv>,
        message: &str,
    ) -> ConversationResult<Response> {
        self.ensure_not_started()?;
        self.prestart(argv)?;
        self.aresume(message).await
    }

    pub fn start_stream(
        &mut self,
        argv: impl Into<Argv>,
        message: &str,
    ) -> ConversationResult<StreamAccumulator<'_>> {
        self.ensure_not_started()?;
        self.prestart(argv)?;
        self.resume_stream(message)
    }

    pub async fn astart_stream(
        &mut self,
        argv: impl Into<Argv>,
        message: &str,
    ) -> ConversationResult<AsyncStreamAccumulator<'_>> {
        self.ensure_not_started()?;
        self.prestart(argv)?;
        self.aresume_stream(message).await
    }

    pub fn resume(&mut self, message: &str) -> ConversationResult<Response> {
        self.resume_with_files(message, &[])
    }

    /// A turn whose user message carries image or document attachments
    pub fn resume_with_files(
        &mut self,
        message: &str,
        files: &[FileSpec],
    ) -> ConversationResult<Response> {
        let provider = self.blocking_provider("resume")?;
        self.ensure_streaming(false, "resume")?;
        self.ensure_started()?;

        let checkpoint = self.checkpoint();
        if let TurnStart::Canned(canned) = self.begin_turn(message, files)? {
            return self.complete_turn(Response::Canned(canned));
        }

        match self.flat_rounds(provider.as_ref()) {
            Ok(response) => self.complete_turn(response),
            Err(err) => {
                self.rollback(&checkpoint);
                Err(err)
            }
        }
    }

    pub async fn aresume(&mut self, message: &str) -> ConversationResult<Response> {
        self.aresume_with_files(message, &[]).await
    }

    pub async fn aresume_with_files(
        &mut self,
        message: &str,
        files: &[FileSpec],
    ) -> ConversationResult<Response> {
        let provider = self.async_provider("aresume")?;
        self.ensure_streaming(false, "aresume")?;
        self.ensure_started()?;

        let checkpoint = self.checkpoint();
        if let TurnStart::Canned(canned) = self.begin_turn(message, files)? {
            return self.complete_turn(Response::Canned(canned));
        }

        match self.aflat_rounds(provider.as_ref()).await {
            Ok(response) => self.complete_turn(response),
            Err(err) => {
                self.rollback(&checkpoint);
                Err(err)
            }
        }
    }

    fn flat_rounds(&mut self, provider: &dyn BlockingProvider) -> ConversationResult<Response> {
        let mut rounds = 0;
        loop {
            let reply = provider
                .complete(self.completion_request())
                .map_err(ConversationError::Backend)?;
            if let Some(response) = self.absorb_reply(reply, &mut rounds)? {
                return Ok(response);
            }
        }
    }

    async fn aflat_rounds(&mut self, provider: &dyn Provider) -> ConversationResult<Response> {
        let mut rounds = 0;
        loop {
            let reply = provider
                .complete(self.completion_request())
                .await
                .map_err(ConversationError::Backend)?;
            if let Some(response) = self.absorb_reply(reply, &mut rounds)? {
                return Ok(response);
            }
        }
    }

    /// Start a streaming turn. The returned accumulator borrows the
    /// conversation until it is finished or dropped.
    pub fn resume_stream(&mut self, message: &str) -> ConversationResult<StreamAccumulator<'_>> {
        let provider = self.blocking_provider("resume_stream")?;
        self.ensure_streaming(true, "resume_stream")?;
        self.ensure_started()?;

        let checkpoint = self.checkpoint();
        match self.begin_turn(message, &[])? {
            TurnStart::Canned(canned) => Ok(StreamAccumulator::canned(self, checkpoint, canned)),
            TurnStart::Proceed => match provider.stream(self.completion_request()) {
                Ok(increments) => Ok(StreamAccumulator::new(self, checkpoint, increments)),
                Err(err) => {
                    self.rollback(&checkpoint);
                    Err(ConversationError::Backend(err))
                }
            },
        }
    }

    pub async fn aresume_stream(
        &mut self,
        message: &str,
    ) -> ConversationResult<AsyncStreamAccumulator<'_>> {
        let provider = self.async_provider("aresume_stream")?;
        self.ensure_streaming(true, "aresume_stream")?;
        self.ensure_started()?;

        let checkpoint = self.checkpoint();
        match self.begin_turn(message, &[])? {
            TurnStart::Canned(canned) => {
                Ok(AsyncStreamAccumulator::canned(self, checkpoint, canned))
            }
            TurnStart::Proceed => match provider.stream(self.completion_request()).await {
                Ok(increments) => Ok(AsyncStreamAccumulator::new(self, checkpoint, increments)),
                Err(err) => {
                    self.rollback(&checkpoint);
                    Err(ConversationError::Backend(err))
                }
            },
        }
    }

    /// Register a hook run after every completed turn, in registration order
    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&Conversation, &Response) -> anyhow::Result<()> + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_prompt(&self) -> Option<&SystemPrompt> {
        self.system_prompt.as_ref()
    }

    pub fn argv(&self) -> &Argv {
        &self.argv
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_streaming(&self) -> bool {
        self.options.streaming
    }

    pub fn is_async(&self) -> bool {
        self.client.is_async()
    }

    pub fn is_oneshot(&self) -> bool {
        self.bot.config().oneshot
    }

    pub fn caches_user_prompt(&self) -> bool {
        self.options.cache_user_prompt || self.bot.config().cache_user_prompt
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn options(&self) -> &ConversationOptions {
        &self.options
    }

    pub fn tool_ledger(&self) -> &ToolLedger {
        &self.tools
    }

    /// The messages the next backend call would carry
    pub fn conversation_context(&self) -> Vec<Message> {
        context::context_window(&self.messages, self.is_oneshot(), self.caches_user_prompt())
    }

    /// Ids of tool uses in the transcript that no tool result answers and
    /// whose result is not already computed, oldest first.
    pub fn unanswered_tool_uses(&self) -> Vec<&str> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .flat_map(|m| m.tool_results())
            .map(|r| r.tool_use_id.as_str())
            .collect();
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_uses())
            .map(|t| t.id.as_str())
            .filter(|id| !answered.contains(id) && !self.tools.is_ready(id))
            .collect()
    }

    /// Id of the most recent tool use still waiting for an answer
    pub fn last_tool_use_id(&self) -> Option<&str> {
        self.unanswered_tool_uses().pop()
    }

    fn ensure_started(&self) -> ConversationResult<()> {
        if self.started {
            Ok(())
        } else {
            Err(ConversationError::NotStarted)
        }
    }

    fn ensure_not_started(&self) -> ConversationResult<()> {
        if self.started {
            Err(ConversationError::AlreadyStarted)
        } else {
            Ok(())
        }
    }

    fn ensure_streaming(&self, streaming: bool, called: &'static str) -> ConversationResult<()> {
        if self.options.streaming == streaming {
            return Ok(());
        }
        Err(ConversationError::StreamingMismatch {
            expected: if self.options.streaming { "streaming" } else { "flat" },
            called,
        })
    }

    fn blocking_provider(
        &self,
        called: &'static str,
    ) -> ConversationResult<Arc<dyn BlockingProvider>> {
        match &self.client {
            Client::Blocking(provider) => Ok(Arc::clone(provider)),
            Client::Async(_) => Err(ConversationError::SyncAsyncMismatch {
                expected: "async",
                called,
            }),
        }
    }

    fn async_provider(&self, called: &'static str) -> ConversationResult<Arc<dyn Provider>> {
        match &self.client {
            Client::Async(provider) => Ok(Arc::clone(provider)),
            Client::Blocking(_) => Err(ConversationError::SyncAsyncMismatch {
                expected: "sync",
                called,
            }),
        }
    }

    /// Run the preprocess hook and append the user side of the turn
    fn begin_turn(&mut self, message: &str, files: &[FileSpec]) -> ConversationResult<TurnStart> {
        debug!(bot = %self.bot.name(), turn = self.messages.len(), "beginning turn");
        let bot = Arc::clone(&self.bot);
        match bot.preprocess(message, self) {
            Some(Intercept::Canned(canned)) => {
                self.append_user(compile_user_message(message, files)?);
                if canned.include_in_context {
                    self.messages.push(Message::assistant_text(&canned.text));
                }
                debug!(include_in_context = canned.include_in_context, "turn answered by canned response");
                Ok(TurnStart::Canned(canned))
            }
            Some(Intercept::Substitute(substitute)) => {
                self.append_user(substitute);
                Ok(TurnStart::Proceed)
            }
            None => {
                self.append_user(compile_user_message(message, files)?);
                Ok(TurnStart::Proceed)
            }
        }
    }

    /// Append a user message, putting any tool results that are computed but
    /// not yet in the transcript at the front of it.
    pub(crate) fn append_user(&mut self, mut message: Message) {
        let answered: Vec<String> = message
            .tool_results()
            .iter()
            .map(|r| r.tool_use_id.clone())
            .collect();
        for id in &answered {
            self.tools.resolve_external(id);
        }
        self.tools.settle_client_requests();

        let ready = self.tools.take_ready();
        if !ready.is_empty() {
            let rest = std::mem::replace(&mut message.content, ready);
            message.content.extend(rest);
        }
        self.messages.push(message);
    }

    fn completion_request(&self) -> CompletionRequest {
        let config = self.bot.config();
        CompletionRequest {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system: self.system_prompt.clone().unwrap_or_default(),
            messages: self.conversation_context(),
            tools: self.bot.tool_schema().to_vec(),
        }
    }

    /// Record a flat backend reply. Returns the turn's response once the
    /// reply needs nothing further from the backend.
    fn absorb_reply(
        &mut self,
        reply: Message,
        rounds: &mut usize,
    ) -> ConversationResult<Option<Response>> {
        if let Some(block) = reply
            .content
            .iter()
            .find(|b| !matches!(b, ContentBlock::Text(_) | ContentBlock::ToolUse(_)))
        {
            return Err(ConversationError::UnrecognizedContentBlock {
                kind: block.kind().to_string(),
            });
        }

        if !reply.has_tool_use() && reply.text().is_empty() {
            return Err(ConversationError::EmptyReply);
        }

        self.messages.push(reply.clone());
        if reply.is_exhausted() {
            return Ok(Some(Response::Backend(reply)));
        }

        match self.dispatch_tools(&reply)? {
            DispatchOutcome::Client(canned) => Ok(Some(Response::Canned(canned))),
            DispatchOutcome::Continue => {
                *rounds += 1;
                if *rounds > self.options.max_tool_rounds {
                    return Err(ConversationError::ToolLoopLimit {
                        rounds: self.options.max_tool_rounds,
                    });
                }
                Ok(None)
            }
        }
    }

    fn complete_turn(&mut self, response: Response) -> ConversationResult<Response> {
        self.run_callbacks(&response)?;
        debug!(bot = %self.bot.name(), canned = response.is_canned(), "turn complete");
        Ok(response)
    }

    pub(crate) fn run_callbacks(&mut self, response: &Response) -> ConversationResult<()> {
        let mut callbacks = std::mem::take(&mut self.callbacks);
        let result = callbacks
            .iter_mut()
            .try_for_each(|callback| callback(&*self, response));
        self.callbacks = callbacks;
        result.map_err(|err| match err.downcast::<ConversationError>() {
            Ok(err) => err,
            Err(err) => ConversationError::Callback(err),
        })
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            messages: self.messages.len(),
            tools: self.tools.clone(),
        }
    }

    /// Put the transcript and tool ledger back as they were at `checkpoint`
    pub(crate) fn rollback(&mut self, checkpoint: &Checkpoint) {
        if self.messages.len() > checkpoint.messages {
            warn!(
                discarded = self.messages.len() - checkpoint.messages,
                "discarding uncommitted turn"
            );
            self.messages.truncate(checkpoint.messages);
        }
        self.tools = checkpoint.tools.clone();
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("bot", &self.bot.name())
            .field("client", &self.client)
            .field("options", &self.options)
            .field("started", &self.started)
            .field("messages", &self.messages.len())
            .finish()
    }
}
