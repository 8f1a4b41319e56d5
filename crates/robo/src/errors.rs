use std::path::PathBuf;

use thiserror::Error;

/// Everything a turn, a prestart or a revival can fail with.
///
/// Backend, tool and hook failures are carried through unchanged so the caller
/// can apply its own policy (retry, backoff, surfacing to a user).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Conversation has already started")]
    AlreadyStarted,

    #[error("Attempting to resume a conversation that has not been started")]
    NotStarted,

    #[error("Conversation is in {expected} mode but was driven through the {called} entry point")]
    SyncAsyncMismatch {
        expected: &'static str,
        called: &'static str,
    },

    #[error("Conversation is in {expected} mode but was driven through the {called} entry point")]
    StreamingMismatch {
        expected: &'static str,
        called: &'static str,
    },

    #[error("Field values missing: {}", .fields.join(", "))]
    FieldValuesMissing { fields: Vec<String> },

    #[error("Unknown conversation: {id}")]
    UnknownConversation { id: String },

    #[error("logs_dir required for a logged conversation")]
    LogsDirRequired,

    #[error("Unrecognized content block in backend response: {kind}")]
    UnrecognizedContentBlock { kind: String },

    #[error("Backend reply carried neither text nor tool uses")]
    EmptyReply,

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(#[source] anyhow::Error),

    #[error("Tool loop exceeded {rounds} backend round-trips without an exhausted response")]
    ToolLoopLimit { rounds: usize },

    #[error("Stream was interrupted before completion; partial output was discarded")]
    StreamInterrupted,

    #[error("Unrecognised media type suffix: {0}")]
    UnrecognisedMediaType(String),

    #[error("Failed to read prompt from {path}: {source}")]
    Prompt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to {operation} conversation log at {path}: {source}")]
    Persistence {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Turn callback failed: {0}")]
    Callback(#[source] anyhow::Error),

    #[error(transparent)]
    Backend(anyhow::Error),
}

impl ConversationError {
    #[must_use]
    pub fn persistence(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Persistence {
            operation,
            path: path.into(),
            source: source.into(),
        }
    }

    /// True for errors that come from calling the engine the wrong way round,
    /// as opposed to errors from the backend, tools or storage.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyStarted
                | Self::NotStarted
                | Self::SyncAsyncMismatch { .. }
                | Self::StreamingMismatch { .. }
        )
    }

    /// True when the backend turned the call away with HTTP 429. The turn
    /// was rolled back, so the same call can simply be made again later.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Backend(err) => err.to_string().starts_with("Server error: 429"),
            _ => false,
        }
    }
}

pub type ConversationResult<T> = Result<T, ConversationError>;
