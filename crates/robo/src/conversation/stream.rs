use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tracing::{debug, error};

use super::dispatch::DispatchOutcome;
use super::intercept::CannedResponse;
use super::response::Response;
use super::{Checkpoint, Conversation};
use crate::errors::{ConversationError, ConversationResult};
use crate::models::content::{ContentBlock, ToolUseBlock};
use crate::models::message::Message;
use crate::providers::base::{IncrementStream, Increments, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Drained,
    Failed,
    Closed,
}

/// What one pull from the source amounted to.
enum Step {
    Chunk(String),
    /// A tool use was buffered; keep reading
    Buffered,
    Failed(ConversationError),
    /// The current source has nothing more
    RoundEnd,
}

/// Where the turn goes once a backend round has been read to the end.
enum NextRound {
    Done,
    Backend,
    Client(String),
}

/// Bookkeeping shared by the blocking and async accumulators.
struct Accumulation {
    checkpoint: Checkpoint,
    text: String,
    chunks: Vec<String>,
    round_text: String,
    tool_uses: Vec<ToolUseBlock>,
    rounds: usize,
    canned: Option<CannedResponse>,
    state: State,
}

impl Accumulation {
    fn new(checkpoint: Checkpoint, canned: Option<CannedResponse>) -> Self {
        Accumulation {
            checkpoint,
            text: String::new(),
            chunks: Vec::new(),
            round_text: String::new(),
            tool_uses: Vec::new(),
            rounds: 0,
            canned,
            state: State::Open,
        }
    }

    fn observe(&mut self, item: Option<anyhow::Result<StreamEvent>>) -> Step {
        match item {
            Some(Ok(StreamEvent::Text(chunk))) => {
                self.text.push_str(&chunk);
                self.round_text.push_str(&chunk);
                self.chunks.push(chunk.clone());
                Step::Chunk(chunk)
            }
            Some(Ok(StreamEvent::ToolUse(block))) => {
                debug!(tool = %block.name, id = %block.id, "tool use streamed");
                self.tool_uses.push(block);
                Step::Buffered
            }
            Some(Err(err)) => {
                self.state = State::Failed;
                Step::Failed(ConversationError::Backend(err))
            }
            None => Step::RoundEnd,
        }
    }

    /// Close a backend round. A round that asked for tools is recorded and
    /// its tools run; anything else leaves the stream drained.
    fn end_round(&mut self, conversation: &mut Conversation) -> ConversationResult<NextRound> {
        if self.tool_uses.is_empty() {
            self.state = State::Drained;
            return Ok(NextRound::Done);
        }

        let mut reply = Message::assistant();
        let text = std::mem::take(&mut self.round_text);
        if !text.is_empty() {
            reply = reply.with_text(text);
        }
        for block in std::mem::take(&mut self.tool_uses) {
            reply = reply.with_content(ContentBlock::ToolUse(block));
        }
        conversation.messages.push(reply.clone());

        match conversation.dispatch_tools(&reply)? {
            DispatchOutcome::Client(canned) => {
                let text = canned.text.clone();
                self.canned = Some(canned);
                Ok(NextRound::Client(text))
            }
            DispatchOutcome::Continue => {
                self.rounds += 1;
                if self.rounds > conversation.options.max_tool_rounds {
                    return Err(ConversationError::ToolLoopLimit {
                        rounds: conversation.options.max_tool_rounds,
                    });
                }
                Ok(NextRound::Backend)
            }
        }
    }

    /// Commit the turn: the final round's text becomes one assistant message
    /// (canned turns were recorded already) and callbacks run.
    fn commit(&mut self, conversation: &mut Conversation) -> ConversationResult<Response> {
        let response = match self.canned.take() {
            Some(canned) => Response::Canned(canned),
            None if self.round_text.is_empty() => {
                self.discard(conversation);
                return Err(ConversationError::EmptyReply);
            }
            None => {
                let message = Message::assistant_text(&self.round_text);
                conversation.messages.push(message.clone());
                Response::Backend(message)
            }
        };
        self.state = State::Closed;
        debug!(
            chars = self.text.len(),
            chunks = self.chunks.len(),
            tool_rounds = self.rounds,
            "stream committed"
        );
        conversation.run_callbacks(&response)?;
        Ok(response)
    }

    fn discard(&mut self, conversation: &mut Conversation) {
        self.state = State::Closed;
        conversation.rollback(&self.checkpoint);
    }

    fn close_on_drop(&mut self, conversation: &mut Conversation) {
        match self.state {
            State::Closed => {}
            State::Drained if !std::thread::panicking() => {
                if let Err(err) = self.commit(conversation) {
                    error!(error = %err, "could not commit stream on drop");
                }
            }
            _ => self.discard(conversation),
        }
    }
}

enum BlockingSource {
    Backend(Increments),
    Canned(Option<String>),
}

impl BlockingSource {
    fn next(&mut self) -> Option<anyhow::Result<StreamEvent>> {
        match self {
            BlockingSource::Backend(increments) => increments.next(),
            BlockingSource::Canned(text) => text.take().map(|text| Ok(StreamEvent::Text(text))),
        }
    }
}

/// One streaming turn over a blocking backend.
///
/// Iterating yields text increments as the backend produces them. When a
/// backend round ends in tool uses, the tools run and the follow-up reply
/// streams on through the same iterator; a client-targeted tool instead
/// yields its text as the last increment.
///
/// The turn is committed by `finish`, or on drop once the stream has been
/// read to the end without error. Any other way out (an error, an early
/// drop, `abort`) leaves the transcript as it was before the turn.
pub struct StreamAccumulator<'c> {
    conversation: &'c mut Conversation,
    source: BlockingSource,
    acc: Accumulation,
}

impl<'c> StreamAccumulator<'c> {
    pub(crate) fn new(
        conversation: &'c mut Conversation,
        checkpoint: Checkpoint,
        increments: Increments,
    ) -> Self {
        StreamAccumulator {
            conversation,
            source: BlockingSource::Backend(increments),
            acc: Accumulation::new(checkpoint, None),
        }
    }

    pub(crate) fn canned(
        conversation: &'c mut Conversation,
        checkpoint: Checkpoint,
        canned: CannedResponse,
    ) -> Self {
        StreamAccumulator {
            conversation,
            source: BlockingSource::Canned(Some(canned.text.clone())),
            acc: Accumulation::new(checkpoint, Some(canned)),
        }
    }

    /// Text received so far, across every round of the turn
    pub fn accumulated_text(&self) -> &str {
        &self.acc.text
    }

    pub fn chunks(&self) -> &[String] {
        &self.acc.chunks
    }

    pub fn is_canned(&self) -> bool {
        self.acc.canned.is_some()
    }

    /// Read whatever is left and commit the turn
    pub fn finish(mut self) -> ConversationResult<Response> {
        if self.acc.state == State::Failed {
            self.acc.discard(self.conversation);
            return Err(ConversationError::StreamInterrupted);
        }
        while let Some(item) = self.next() {
            if let Err(err) = item {
                self.acc.discard(self.conversation);
                return Err(err);
            }
        }
        self.acc.commit(self.conversation)
    }

    /// Close the turn without committing anything
    pub fn abort(mut self) {
        self.acc.discard(self.conversation);
    }

    fn next_round(&mut self) -> ConversationResult<()> {
        match self.acc.end_round(self.conversation)? {
            NextRound::Done => {}
            NextRound::Client(text) => self.source = BlockingSource::Canned(Some(text)),
            NextRound::Backend => {
                let provider = self.conversation.blocking_provider("resume_stream")?;
                let increments = provider
                    .stream(self.conversation.completion_request())
                    .map_err(ConversationError::Backend)?;
                self.source = BlockingSource::Backend(increments);
            }
        }
        Ok(())
    }
}

impl Iterator for StreamAccumulator<'_> {
    type Item = ConversationResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.acc.state == State::Open {
            let item = self.source.next();
            match self.acc.observe(item) {
                Step::Chunk(chunk) => return Some(Ok(chunk)),
                Step::Buffered => {}
                Step::Failed(err) => return Some(Err(err)),
                Step::RoundEnd => {
                    if let Err(err) = self.next_round() {
                        self.acc.state = State::Failed;
                        return Some(Err(err));
                    }
                }
            }
        }
        None
    }
}

impl Drop for StreamAccumulator<'_> {
    fn drop(&mut self) {
        self.acc.close_on_drop(self.conversation);
    }
}

enum AsyncSource {
    Opening(BoxFuture<'static, anyhow::Result<IncrementStream>>),
    Backend(IncrementStream),
    Canned(Option<String>),
}

/// One streaming turn over an async backend; the `Stream` counterpart of
/// [`StreamAccumulator`] with the same tool and commit rules.
pub struct AsyncStreamAccumulator<'c> {
    conversation: &'c mut Conversation,
    source: AsyncSource,
    acc: Accumulation,
}

impl<'c> AsyncStreamAccumulator<'c> {
    pub(crate) fn new(
        conversation: &'c mut Conversation,
        checkpoint: Checkpoint,
        increments: IncrementStream,
    ) -> Self {
        AsyncStreamAccumulator {
            conversation,
            source: AsyncSource::Backend(increments),
            acc: Accumulation::new(checkpoint, None),
        }
    }

    pub(crate) fn canned(
        conversation: &'c mut Conversation,
        checkpoint: Checkpoint,
        canned: CannedResponse,
    ) -> Self {
        AsyncStreamAccumulator {
            conversation,
            source: AsyncSource::Canned(Some(canned.text.clone())),
            acc: Accumulation::new(checkpoint, Some(canned)),
        }
    }

    pub fn accumulated_text(&self) -> &str {
        &self.acc.text
    }

    pub fn chunks(&self) -> &[String] {
        &self.acc.chunks
    }

    pub fn is_canned(&self) -> bool {
        self.acc.canned.is_some()
    }

    pub async fn finish(mut self) -> ConversationResult<Response> {
        if self.acc.state == State::Failed {
            self.acc.discard(self.conversation);
            return Err(ConversationError::StreamInterrupted);
        }
        while let Some(item) = self.next().await {
            if let Err(err) = item {
                self.acc.discard(self.conversation);
                return Err(err);
            }
        }
        self.acc.commit(self.conversation)
    }

    pub fn abort(mut self) {
        self.acc.discard(self.conversation);
    }

    fn next_round(&mut self) -> ConversationResult<()> {
        match self.acc.end_round(self.conversation)? {
            NextRound::Done => {}
            NextRound::Client(text) => self.source = AsyncSource::Canned(Some(text)),
            NextRound::Backend => {
                let provider = self.conversation.async_provider("aresume_stream")?;
                let request = self.conversation.completion_request();
                self.source =
                    AsyncSource::Opening(async move { provider.stream(request).await }.boxed());
            }
        }
        Ok(())
    }
}

impl Stream for AsyncStreamAccumulator<'_> {
    type Item = ConversationResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        while this.acc.state == State::Open {
            let item = match &mut this.source {
                AsyncSource::Opening(opening) => {
                    match opening.poll_unpin(cx) {
                        Poll::Ready(Ok(increments)) => {
                            this.source = AsyncSource::Backend(increments)
                        }
                        Poll::Ready(Err(err)) => {
                            this.acc.state = State::Failed;
                            return Poll::Ready(Some(Err(ConversationError::Backend(err))));
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                    continue;
                }
                AsyncSource::Backend(increments) => match increments.poll_next_unpin(cx) {
                    Poll::Ready(item) => item,
                    Poll::Pending => return Poll::Pending,
                },
                AsyncSource::Canned(text) => text.take().map(|text| Ok(StreamEvent::Text(text))),
            };
            match this.acc.observe(item) {
                Step::Chunk(chunk) => return Poll::Ready(Some(Ok(chunk))),
                Step::Buffered => {}
                Step::Failed(err) => return Poll::Ready(Some(Err(err))),
                Step::RoundEnd => {
                    if let Err(err) = this.next_round() {
                        this.acc.state = State::Failed;
                        return Poll::Ready(Some(Err(err)));
                    }
                }
            }
        }
        Poll::Ready(None)
    }
}

impl Drop for AsyncStreamAccumulator<'_> {
    fn drop(&mut self) {
        self.acc.close_on_drop(self.conversation);
    }
}
