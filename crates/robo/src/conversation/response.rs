use serde::de::DeserializeOwned;

use super::intercept::CannedResponse;
use crate::models::content::ContentBlock;
use crate::models::message::Message;

/// The outcome of one turn: a backend message or a canned reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Backend(Message),
    Canned(CannedResponse),
}

impl Response {
    pub fn text(&self) -> String {
        match self {
            Response::Backend(message) => message.text(),
            Response::Canned(canned) => canned.text.clone(),
        }
    }

    pub fn content(&self) -> Vec<ContentBlock> {
        match self {
            Response::Backend(message) => message.content.clone(),
            Response::Canned(canned) => vec![ContentBlock::text(&canned.text)],
        }
    }

    pub fn is_canned(&self) -> bool {
        matches!(self, Response::Canned(_))
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            Response::Backend(message) => Some(message),
            Response::Canned(_) => None,
        }
    }

    /// Parse the response text as JSON, for bots that answer in structured form
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.text().trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_accessors_agree_across_variants() {
        let backend = Response::Backend(Message::assistant_text("Hello"));
        let canned = Response::Canned(CannedResponse::new("Hello", true));

        assert_eq!(backend.text(), canned.text());
        assert_eq!(backend.content(), canned.content());
        assert!(canned.is_canned());
        assert!(!backend.is_canned());
        assert!(canned.message().is_none());
    }

    #[test]
    fn test_json_response() {
        let response = Response::Backend(Message::assistant_text("{\"answer\": 42}\n"));
        let value: Value = response.json().unwrap();
        assert_eq!(value["answer"], 42);
    }
}
