pub mod attachments;
pub mod bot;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod prompt_template;
pub mod providers;
pub mod tools;

pub use bot::{Bot, BotConfig};
pub use conversation::intercept::{CannedResponse, Intercept};
pub use conversation::response::Response;
pub use conversation::{Conversation, ConversationOptions};
pub use errors::{ConversationError, ConversationResult};
pub use persistence::LoggedConversation;
pub use prompt_template::Argv;
pub use providers::base::Client;
