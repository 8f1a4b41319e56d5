use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use robo::attachments::FileSpec;
use robo::models::content::{CacheControl, ContentBlock};
use robo::models::message::Message;
use robo::models::role::Role;
use robo::providers::base::SystemPrompt;
use robo::providers::mock::MockProvider;
use robo::{
    Argv, Bot, BotConfig, Client, Conversation, ConversationError, ConversationOptions, Intercept,
    Response,
};

fn animal_bot() -> Bot {
    Bot::new(BotConfig {
        name: "AnimalBot".to_string(),
        fields: vec!["ANIMAL_TYPE".to_string()],
        ..Default::default()
    })
    .with_system_prompt("Respond with a sound made by a {{ANIMAL_TYPE}}.")
}

fn ping_bot() -> Bot {
    Bot::new(BotConfig::default()).with_preprocess_fn(|message, _conversation| {
        (message == "PING").then(|| Intercept::canned("PONG"))
    })
}

#[test]
fn test_resume_before_prestart_fails() {
    let mut conversation = Conversation::new(animal_bot(), Client::blocking(MockProvider::default()));
    let err = conversation.resume("hi").unwrap_err();
    assert!(matches!(err, ConversationError::NotStarted));
    assert!(conversation.messages().is_empty());
}

#[tokio::test]
async fn test_aresume_before_prestart_fails() {
    let mut conversation =
        Conversation::new(animal_bot(), Client::asynchronous(MockProvider::default()));
    let err = conversation.aresume("hi").await.unwrap_err();
    assert!(matches!(err, ConversationError::NotStarted));
}

#[test]
fn test_start_twice_fails() {
    let mut conversation = Conversation::new(animal_bot(), Client::blocking(MockProvider::default()));
    conversation.start(["cat"], "hi").unwrap();
    let err = conversation.start(["dog"], "hi").unwrap_err();
    assert!(matches!(err, ConversationError::AlreadyStarted));
}

#[test]
fn test_named_argv_missing_fields() {
    let bot = Bot::new(BotConfig {
        fields: vec!["ANIMAL_TYPE".to_string(), "COLOUR".to_string(), "SIZE".to_string()],
        ..Default::default()
    });
    let mut values = BTreeMap::new();
    values.insert("COLOUR".to_string(), "green".to_string());

    let mut conversation = Conversation::new(bot, Client::blocking(MockProvider::default()));
    let err = conversation.prestart(values).unwrap_err();
    match err {
        ConversationError::FieldValuesMissing { fields } => {
            assert_eq!(fields, vec!["ANIMAL_TYPE".to_string(), "SIZE".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!conversation.is_started());
}

#[test]
fn test_short_positional_argv_leaves_placeholders() {
    let bot = Bot::new(BotConfig {
        fields: vec!["ANIMAL_TYPE".to_string(), "COLOUR".to_string()],
        ..Default::default()
    })
    .with_system_prompt("You are a {{COLOUR}} {{ANIMAL_TYPE}}.");

    let mut conversation = Conversation::new(bot, Client::blocking(MockProvider::default()));
    conversation.prestart(["cat"]).unwrap();
    assert_eq!(
        conversation.system_prompt(),
        Some(&SystemPrompt::Text("You are a {{COLOUR}} cat.".to_string()))
    );
}

#[test]
fn test_animal_scenario() {
    let mock = MockProvider::new(vec![Message::assistant_text("Meow")]);
    let mut conversation = Conversation::new(animal_bot(), Client::blocking(mock.clone()));

    let response = conversation.start(["cat"], "hi").unwrap();
    assert_eq!(response.text(), "Meow");
    assert_eq!(
        conversation.system_prompt(),
        Some(&SystemPrompt::Text("Respond with a sound made by a cat.".to_string()))
    );
    assert_eq!(
        conversation.messages(),
        &[Message::user_text("hi"), Message::assistant_text("Meow")]
    );

    let request = mock.last_request().unwrap();
    assert_eq!(request.system.text(), "Respond with a sound made by a cat.");
    assert_eq!(request.model, robo::bot::DEFAULT_MODEL);
}

#[test]
fn test_ping_pong_scenario() {
    let mock = MockProvider::default();
    let mut conversation = Conversation::new(ping_bot(), Client::blocking(mock.clone()));
    conversation.prestart(Argv::none()).unwrap();

    let first = conversation.resume("PING").unwrap();
    assert!(first.is_canned());
    assert_eq!(first.text(), "PONG");
    assert_eq!(conversation.messages().len(), 2);

    let second = conversation.resume("PING").unwrap();
    assert_eq!(second, first);
    assert_eq!(conversation.messages().len(), 4);
    assert_eq!(conversation.messages()[3], Message::assistant_text("PONG"));
    assert_eq!(mock.calls(), 0);

    let third = conversation.resume("hello").unwrap();
    assert_eq!(third.text(), "I understand you said: 'hello'");
    assert_eq!(mock.calls(), 1);
}

#[test]
fn test_hidden_canned_response_keeps_only_user_message() {
    let bot = Bot::new(BotConfig::default())
        .with_preprocess_fn(|_, _| Some(Intercept::canned_hidden("not remembered")));
    let mut conversation = Conversation::new(bot, Client::blocking(MockProvider::default()));
    conversation.prestart(Argv::none()).unwrap();

    let response = conversation.resume("hello").unwrap();
    assert_eq!(response.text(), "not remembered");
    assert_eq!(conversation.messages(), &[Message::user_text("hello")]);
}

#[test]
fn test_substituted_message_is_sent() {
    let bot = Bot::new(BotConfig::default()).with_preprocess_fn(|message, _| {
        Some(Intercept::substitute(Message::user_text(message.to_uppercase())))
    });
    let mock = MockProvider::default();
    let mut conversation = Conversation::new(bot, Client::blocking(mock.clone()));
    conversation.prestart(Argv::none()).unwrap();

    let response = conversation.resume("quiet please").unwrap();
    assert_eq!(response.text(), "I understand you said: 'QUIET PLEASE'");
    assert_eq!(conversation.messages()[0], Message::user_text("QUIET PLEASE"));
}

#[test]
fn test_oneshot_sends_single_message() {
    let bot = Bot::new(BotConfig {
        oneshot: true,
        ..Default::default()
    });
    let mock = MockProvider::default();
    let mut conversation = Conversation::new(bot, Client::blocking(mock.clone()));
    conversation.prestart(Argv::none()).unwrap();

    for turn in ["one", "two", "three"] {
        conversation.resume(turn).unwrap();
    }

    assert_eq!(conversation.messages().len(), 6);
    let requests = mock.requests();
    assert_eq!(requests.len(), 3);
    for (request, turn) in requests.iter().zip(["one", "two", "three"]) {
        assert_eq!(request.messages, vec![Message::user_text(turn)]);
    }
}

#[test]
fn test_cache_marker_only_on_outgoing_context() {
    let mock = MockProvider::default();
    let mut conversation = Conversation::with_options(
        Bot::new(BotConfig::default()),
        Client::blocking(mock.clone()),
        ConversationOptions::default().with_cache_user_prompt(true),
    );
    conversation.prestart(Argv::none()).unwrap();
    conversation.resume("first").unwrap();
    conversation.resume("second").unwrap();

    for request in mock.requests() {
        let last = request.messages.last().unwrap().content.last().unwrap();
        assert_eq!(last.cache_control(), Some(CacheControl::Ephemeral));
        let earlier = &request.messages[..request.messages.len() - 1];
        assert!(earlier
            .iter()
            .all(|m| m.content.iter().all(|b| b.cache_control().is_none())));
    }
    assert!(conversation
        .messages()
        .iter()
        .all(|m| m.content.iter().all(|b| b.cache_control().is_none())));
}

#[test]
fn test_soft_start_seeds_welcome_message() {
    let bot = Bot::new(BotConfig {
        welcome_message: Some("Hello, how can I help you?".to_string()),
        soft_start: true,
        ..Default::default()
    });
    let mock = MockProvider::default();
    let mut conversation = Conversation::new(bot, Client::blocking(mock.clone()));
    conversation.start(Argv::none(), "hi").unwrap();

    let messages = conversation.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0], Message::assistant_text("Hello, how can I help you?"));
    assert_eq!(mock.last_request().unwrap().messages.len(), 2);
}

#[test]
fn test_sync_async_mismatch() {
    let mut conversation = Conversation::started_with(
        animal_bot(),
        Client::asynchronous(MockProvider::default()),
        ConversationOptions::default(),
        ["cat"],
    )
    .unwrap();
    let err = conversation.resume("hi").unwrap_err();
    assert!(matches!(err, ConversationError::SyncAsyncMismatch { .. }));
    assert!(err.is_usage_error());
    assert!(conversation.messages().is_empty());
}

#[test]
fn test_streaming_mismatch() {
    let mut conversation = Conversation::started_with(
        animal_bot(),
        Client::blocking(MockProvider::default()),
        ConversationOptions::streaming(),
        ["cat"],
    )
    .unwrap();
    let err = conversation.resume("hi").unwrap_err();
    assert!(matches!(err, ConversationError::StreamingMismatch { .. }));
}

#[tokio::test]
async fn test_async_conversation() -> Result<()> {
    let mock = MockProvider::new(vec![Message::assistant_text("Meow")]);
    let mut conversation = Conversation::new(animal_bot(), Client::asynchronous(mock.clone()));

    let response = conversation.astart(["cat"], "hi").await?;
    assert_eq!(response.text(), "Meow");

    let response = conversation.aresume("again").await?;
    assert_eq!(response.text(), "I understand you said: 'again'");
    assert_eq!(conversation.messages().len(), 4);
    assert_eq!(mock.calls(), 2);
    Ok(())
}

#[test]
fn test_unrecognized_block_in_reply() {
    let mock = MockProvider::new(vec![Message::assistant().with_image("image/png", "AAAA")]);
    let mut conversation = Conversation::new(animal_bot(), Client::blocking(mock));
    let err = conversation.start(["cat"], "draw").unwrap_err();
    assert!(matches!(err, ConversationError::UnrecognizedContentBlock { kind } if kind == "image"));
}

#[test]
fn test_backend_error_propagates() {
    struct FailingProvider;

    impl robo::providers::base::BlockingProvider for FailingProvider {
        fn complete(
            &self,
            _request: robo::providers::base::CompletionRequest,
        ) -> Result<Message> {
            Err(anyhow::anyhow!("Server error: 529"))
        }

        fn stream(
            &self,
            _request: robo::providers::base::CompletionRequest,
        ) -> Result<robo::providers::base::Increments> {
            Err(anyhow::anyhow!("Server error: 529"))
        }
    }

    let mut conversation = Conversation::new(animal_bot(), Client::blocking(FailingProvider));
    let err = conversation.start(["cat"], "hi").unwrap_err();
    assert!(matches!(err, ConversationError::Backend(_)));
    assert_eq!(err.to_string(), "Server error: 529");
    assert!(conversation.messages().is_empty());
}

#[test]
fn test_empty_reply_is_an_error() {
    let mock = MockProvider::new(vec![Message::assistant()]);
    let mut conversation = Conversation::new(animal_bot(), Client::blocking(mock.clone()));

    let err = conversation.start(["cat"], "say nothing").unwrap_err();
    assert!(matches!(err, ConversationError::EmptyReply));
    assert!(conversation.messages().is_empty());

    let response = conversation.resume("say something").unwrap();
    assert_eq!(response.text(), "I understand you said: 'say something'");
    assert_eq!(
        mock.last_request().unwrap().messages,
        vec![Message::user_text("say something")]
    );
}

#[test]
fn test_callbacks_run_after_each_turn() {
    let seen: Arc<Mutex<Vec<(usize, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut conversation = Conversation::new(ping_bot(), Client::blocking(MockProvider::default()));

    let log = Arc::clone(&seen);
    conversation.register_callback(move |conversation, response| {
        log.lock()
            .unwrap()
            .push((conversation.messages().len(), response.text()));
        Ok(())
    });

    conversation.start(Argv::none(), "PING").unwrap();
    conversation.resume("hello").unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (2, "PONG".to_string()),
            (4, "I understand you said: 'hello'".to_string())
        ]
    );
}

#[test]
fn test_callback_error_propagates() {
    let mut conversation = Conversation::new(ping_bot(), Client::blocking(MockProvider::default()));
    conversation.register_callback(|_, _| Err(anyhow::anyhow!("disk full")));

    let err = conversation.start(Argv::none(), "PING").unwrap_err();
    assert!(matches!(err, ConversationError::Callback(_)));
    assert!(err.to_string().contains("disk full"));
}

#[test]
fn test_resume_with_files() {
    let mock = MockProvider::default();
    let mut conversation = Conversation::new(animal_bot(), Client::blocking(mock.clone()));
    conversation.prestart(["cat"]).unwrap();

    conversation
        .resume_with_files(
            "what is this?",
            &[FileSpec::image("image/png", b"1234567890".to_vec())],
        )
        .unwrap();

    let sent = &mock.last_request().unwrap().messages[0];
    assert_eq!(sent.role, Role::User);
    assert_eq!(sent.content[0], ContentBlock::image("image/png", "MTIzNDU2Nzg5MA=="));
    assert_eq!(sent.content[1], ContentBlock::text("what is this?"));
}

#[test]
fn test_response_accessors_are_uniform() {
    let mut conversation = Conversation::new(ping_bot(), Client::blocking(MockProvider::default()));
    conversation.prestart(Argv::none()).unwrap();

    let canned = conversation.resume("PING").unwrap();
    let backend = conversation.resume("PONG").unwrap();

    assert!(matches!(canned, Response::Canned(_)));
    assert!(matches!(backend, Response::Backend(_)));
    assert_eq!(canned.content(), vec![ContentBlock::text("PONG")]);
    assert_eq!(backend.content(), vec![ContentBlock::text("I understand you said: 'PONG'")]);
}
