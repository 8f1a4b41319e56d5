use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bot::Bot;
use crate::conversation::{Conversation, ConversationOptions};
use crate::errors::{ConversationError, ConversationResult};
use crate::models::message::Message;
use crate::prompt_template::Argv;
use crate::providers::base::Client;

/// A conversation transcript as written to disk after each turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub when: DateTime<Utc>,
    /// Name of the bot the conversation was held with
    pub with: String,
    pub argv: Argv,
    pub messages: Vec<Message>,
}

/// A directory of conversation logs, one JSON file per conversation, named
/// `<YYYY-MM-DD>_<id>.json` after the day the conversation was created.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> ConversationResult<Self> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(ConversationError::LogsDirRequired);
        }
        Ok(LogStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &str, created: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", created.format("%Y-%m-%d"), id))
    }

    /// Write `record` through a temporary file, so a reader never sees a
    /// half-written log.
    pub fn write(&self, path: &Path, record: &LogRecord) -> ConversationResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| ConversationError::persistence("create", &self.dir, e))?;
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| ConversationError::persistence("serialize", path, e))?;

        let staging = path.with_extension("json.tmp");
        fs::write(&staging, content)
            .map_err(|e| ConversationError::persistence("write", &staging, e))?;
        fs::rename(&staging, path).map_err(|e| ConversationError::persistence("write", path, e))
    }

    pub fn read(&self, path: &Path) -> ConversationResult<LogRecord> {
        let content =
            fs::read_to_string(path).map_err(|e| ConversationError::persistence("read", path, e))?;
        serde_json::from_str(&content).map_err(|e| ConversationError::persistence("parse", path, e))
    }

    /// Find the log for `id`, whatever day it was created on
    pub fn locate(&self, id: &str) -> ConversationResult<PathBuf> {
        let suffix = format!("_{id}.json");
        let unknown = || ConversationError::UnknownConversation { id: id.to_string() };

        let entries = fs::read_dir(&self.dir).map_err(|_| unknown())?;
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(&suffix))
            })
            .ok_or_else(unknown)
    }

    /// Ids of every logged conversation, newest first
    pub fn list(&self) -> ConversationResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| ConversationError::persistence("list", &self.dir, e))?;

        let mut logs: Vec<(std::time::SystemTime, String)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                let stem = name.strip_suffix(".json")?;
                let (_, id) = stem.split_once('_')?;
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, id.to_string()))
            })
            .collect();
        logs.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(logs.into_iter().map(|(_, id)| id).collect())
    }
}

/// A conversation that saves its transcript to a [`LogStore`] after every
/// turn, and can be revived from it later by id.
pub struct LoggedConversation {
    conversation: Conversation,
    id: String,
    path: PathBuf,
}

impl LoggedConversation {
    pub fn new(
        bot: impl Into<Arc<Bot>>,
        client: Client,
        options: ConversationOptions,
        logs_dir: impl Into<PathBuf>,
    ) -> ConversationResult<Self> {
        let store = LogStore::new(logs_dir)?;
        let id = Uuid::new_v4().to_string();
        let path = store.record_path(&id, Utc::now());
        let conversation = Conversation::with_options(bot, client, options);
        Ok(Self::attach(conversation, store, id, path))
    }

    /// Reload the conversation logged under `id` and prestart it with `argv`.
    /// The system prompt is resolved afresh from `bot`; later turns keep
    /// writing to the same log.
    pub fn revive(
        bot: impl Into<Arc<Bot>>,
        client: Client,
        options: ConversationOptions,
        id: &str,
        logs_dir: impl Into<PathBuf>,
        argv: impl Into<Argv>,
    ) -> ConversationResult<Self> {
        let store = LogStore::new(logs_dir)?;
        let path = store.locate(id)?;
        let record = store.read(&path)?;

        let mut conversation = Conversation::with_options(bot, client, options);
        conversation.restore(record.messages)?;
        conversation.prestart(argv)?;
        info!(id, messages = conversation.messages().len(), "conversation revived");
        Ok(Self::attach(conversation, store, id.to_string(), path))
    }

    fn attach(mut conversation: Conversation, store: LogStore, id: String, path: PathBuf) -> Self {
        let log_path = path.clone();
        conversation.register_callback(move |conversation, _response| {
            let record = LogRecord {
                when: Utc::now(),
                with: conversation.bot().name().to_string(),
                argv: conversation.argv().clone(),
                messages: conversation.messages().to_vec(),
            };
            store.write(&log_path, &record)?;
            debug!(path = %log_path.display(), "conversation log written");
            Ok(())
        });
        LoggedConversation {
            conversation,
            id,
            path,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.id
    }

    pub fn log_path(&self) -> &Path {
        &self.path
    }

    pub fn into_inner(self) -> Conversation {
        self.conversation
    }
}

impl Deref for LoggedConversation {
    type Target = Conversation;

    fn deref(&self) -> &Self::Target {
        &self.conversation
    }
}

impl DerefMut for LoggedConversation {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conversation
    }
}

impl std::fmt::Debug for LoggedConversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggedConversation")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("conversation", &self.conversation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_path_is_bucketed_by_day() {
        let store = LogStore::new("/tmp/logs").unwrap();
        let created = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        assert_eq!(
            store.record_path("abc", created),
            PathBuf::from("/tmp/logs/2024-03-09_abc.json")
        );
    }

    #[test]
    fn test_empty_logs_dir_rejected() {
        assert!(matches!(
            LogStore::new(""),
            Err(ConversationError::LogsDirRequired)
        ));
    }

    #[test]
    fn test_write_locate_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(temp_dir.path()).unwrap();
        let path = store.record_path("abc-123", Utc::now());
        let record = LogRecord {
            when: Utc::now(),
            with: "Bot".to_string(),
            argv: Argv::from(["cat"]),
            messages: vec![Message::user_text("hello")],
        };

        store.write(&path, &record).unwrap();
        assert_eq!(store.locate("abc-123").unwrap(), path);
        assert_eq!(store.read(&path).unwrap(), record);
        assert_eq!(store.list().unwrap(), vec!["abc-123".to_string()]);
    }

    #[test]
    fn test_unknown_id() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(temp_dir.path()).unwrap();
        let err = store.locate("missing").unwrap_err();
        assert!(matches!(err, ConversationError::UnknownConversation { id } if id == "missing"));
    }
}
