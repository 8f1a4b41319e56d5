use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::StreamExt;
use robo::conversation::intercept::ReconnectOnPrefix;
use robo::models::message::Message;
use robo::models::tool::Tool;
use robo::providers::mock::MockProvider;
use robo::tools::ToolOutput;
use robo::{
    Argv, Bot, BotConfig, Client, Conversation, ConversationError, ConversationOptions, Intercept,
};
use serde_json::json;

fn streaming(mock: &MockProvider) -> Conversation {
    Conversation::started_with(
        Bot::new(BotConfig::default()),
        Client::blocking(mock.clone()),
        ConversationOptions::streaming(),
        Argv::none(),
    )
    .unwrap()
}

fn streaming_with(bot: Bot, mock: &MockProvider) -> Conversation {
    Conversation::started_with(
        bot,
        Client::blocking(mock.clone()),
        ConversationOptions::streaming(),
        Argv::none(),
    )
    .unwrap()
}

fn weather_tool() -> Tool {
    Tool::new(
        "get_weather",
        "Look up the current weather for a city",
        json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    )
}

fn weather_bot() -> Bot {
    Bot::new(BotConfig::default())
        .with_tool_fn(weather_tool(), |input| {
            let city = input["city"].as_str().unwrap_or("nowhere");
            Ok(ToolOutput::model(format!("sunny in {city}")))
        })
        .unwrap()
}

fn navigation_bot() -> Bot {
    let navigate = Tool::new("navigate", "Send the user to a page", json!({"type": "object"}));
    Bot::new(BotConfig::default())
        .with_tool_fn(navigate, |_| Ok(ToolOutput::client("@@@@NAVIGATE /xyz/xyz/")))
        .unwrap()
        .with_preprocessor(ReconnectOnPrefix::new("RECONNECT:"))
}

fn async_streaming(mock: &MockProvider) -> Conversation {
    Conversation::started_with(
        Bot::new(BotConfig::default()),
        Client::asynchronous(mock.clone()),
        ConversationOptions::streaming(),
        Argv::none(),
    )
    .unwrap()
}

#[test]
fn test_stream_yields_increments_then_commits() {
    let mock = MockProvider::default().with_scenario("hi", Message::assistant_text("Hello there friend"));
    let mut conversation = streaming(&mock);

    let mut stream = conversation.resume_stream("hi").unwrap();
    let chunks: Vec<String> = stream.by_ref().map(|chunk| chunk.unwrap()).collect();
    assert_eq!(chunks, vec!["Hello ", "there ", "friend"]);
    assert_eq!(stream.accumulated_text(), "Hello there friend");

    let response = stream.finish().unwrap();
    assert_eq!(response.text(), "Hello there friend");
    assert_eq!(
        conversation.messages(),
        &[
            Message::user_text("hi"),
            Message::assistant_text("Hello there friend")
        ]
    );
}

#[test]
fn test_drained_stream_commits_on_drop() {
    let mock = MockProvider::default();
    let mut conversation = streaming(&mock);

    let text: String = conversation
        .resume_stream("hello")
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect();
    assert_eq!(text, "I understand you said: 'hello'");
    assert_eq!(conversation.messages().len(), 2);
    assert_eq!(conversation.messages()[1], Message::assistant_text(text));
}

#[test]
fn test_finish_reads_remaining_increments() {
    let mock = MockProvider::default();
    let mut conversation = streaming(&mock);

    let mut stream = conversation.resume_stream("hello").unwrap();
    assert_eq!(stream.next().unwrap().unwrap(), "I ");
    let response = stream.finish().unwrap();
    assert_eq!(response.text(), "I understand you said: 'hello'");
    assert_eq!(conversation.messages().len(), 2);
}

#[test]
fn test_mid_stream_failure_rolls_back() {
    let mock = MockProvider::default()
        .with_scenario("tell me a story", Message::assistant_text("Once upon a time"))
        .with_stream_failure_after(2);
    let mut conversation = streaming(&mock);
    let before = conversation.messages().to_vec();

    let mut stream = conversation.resume_stream("tell me a story").unwrap();
    assert_eq!(stream.next().unwrap().unwrap(), "Once ");
    assert_eq!(stream.next().unwrap().unwrap(), "upon ");
    assert!(matches!(
        stream.next().unwrap(),
        Err(ConversationError::Backend(_))
    ));
    assert!(stream.next().is_none());

    let err = stream.finish().unwrap_err();
    assert!(matches!(err, ConversationError::StreamInterrupted));
    assert_eq!(conversation.messages(), before.as_slice());
}

#[test]
fn test_failure_during_finish_rolls_back() {
    let mock = MockProvider::default().with_stream_failure_after(1);
    let mut conversation = streaming(&mock);

    let err = conversation.resume_stream("hello").unwrap().finish().unwrap_err();
    assert!(matches!(err, ConversationError::Backend(_)));
    assert!(conversation.messages().is_empty());
}

#[test]
fn test_early_drop_and_abort_discard_the_turn() {
    let mock = MockProvider::default();
    let mut conversation = streaming(&mock);

    {
        let mut stream = conversation.resume_stream("first").unwrap();
        stream.next();
    }
    assert!(conversation.messages().is_empty());

    let stream = conversation.resume_stream("second").unwrap();
    stream.abort();
    assert!(conversation.messages().is_empty());

    conversation.resume_stream("third").unwrap().finish().unwrap();
    assert_eq!(conversation.messages().len(), 2);
    assert_eq!(conversation.messages()[0], Message::user_text("third"));
}

#[test]
fn test_early_drop_mid_tool_loop_discards_the_turn() {
    let mock = MockProvider::new(vec![Message::tool_request(
        "tu_1",
        "get_weather",
        json!({"city": "Lima"}),
    )]);
    let mut conversation = streaming_with(weather_bot(), &mock);

    {
        let mut stream = conversation.resume_stream("weather?").unwrap();
        assert_eq!(stream.next().unwrap().unwrap(), "Tool ");
    }
    assert_eq!(mock.calls(), 2);
    assert!(conversation.messages().is_empty());
    assert!(conversation.tool_ledger().open().is_empty());
    assert!(conversation.tool_ledger().resolved().is_empty());
}

#[test]
fn test_stream_runs_model_tools_and_continues() {
    let reply = Message::assistant()
        .with_text("Let me check.")
        .with_tool_use("tu_1", "get_weather", json!({"city": "Paris"}));
    let mock = MockProvider::new(vec![reply.clone()]);
    let mut conversation = streaming_with(weather_bot(), &mock);

    let mut stream = conversation.resume_stream("weather?").unwrap();
    let chunks: Vec<String> = stream.by_ref().map(|chunk| chunk.unwrap()).collect();
    assert_eq!(chunks.first().unwrap(), "Let ");
    assert_eq!(chunks.last().unwrap(), "Paris");
    assert_eq!(
        stream.accumulated_text(),
        "Let me check.Tool response was:sunny in Paris"
    );

    let response = stream.finish().unwrap();
    assert_eq!(response.text(), "Tool response was:sunny in Paris");
    assert_eq!(mock.calls(), 2);
    assert_eq!(
        conversation.messages(),
        &[
            Message::user_text("weather?"),
            reply,
            Message::tool_result("tu_1", "sunny in Paris"),
            Message::assistant_text("Tool response was:sunny in Paris"),
        ]
    );
    assert!(conversation.tool_ledger().open().is_empty());
}

#[test]
fn test_stream_client_tool_yields_its_text_then_reconnects() {
    let mock = MockProvider::new(vec![Message::tool_request("tu_nav", "navigate", json!({}))]);
    let mut conversation = streaming_with(navigation_bot(), &mock);

    let mut stream = conversation.resume_stream("take me home").unwrap();
    let chunks: Vec<String> = stream.by_ref().map(|chunk| chunk.unwrap()).collect();
    assert_eq!(chunks, vec!["@@@@NAVIGATE /xyz/xyz/"]);
    assert!(stream.is_canned());
    let response = stream.finish().unwrap();
    assert!(response.is_canned());
    assert_eq!(mock.calls(), 1);
    assert_eq!(conversation.messages().len(), 2);
    assert_eq!(conversation.last_tool_use_id(), Some("tu_nav"));

    let text: String = conversation
        .resume_stream("RECONNECT: arrived")
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect();
    assert_eq!(text, "Tool response was:arrived");
    assert_eq!(
        conversation.messages()[2],
        Message::tool_result("tu_nav", "arrived")
    );
    assert_eq!(conversation.messages().len(), 4);
    assert!(conversation.last_tool_use_id().is_none());
}

#[test]
fn test_stream_tool_failure_rolls_back_whole_turn() {
    let bot = Bot::new(BotConfig::default())
        .with_tool_fn(weather_tool(), |_| Err(anyhow::anyhow!("weather service down")))
        .unwrap();
    let mock = MockProvider::new(vec![Message::tool_request(
        "tu_1",
        "get_weather",
        json!({"city": "Quito"}),
    )]);
    let mut conversation = streaming_with(bot, &mock);

    let err = conversation.resume_stream("weather?").unwrap().finish().unwrap_err();
    assert!(matches!(err, ConversationError::ToolExecution(_)));
    assert!(conversation.messages().is_empty());
    assert!(conversation.tool_ledger().open().is_empty());

    conversation.resume_stream("hello").unwrap().finish().unwrap();
    assert_eq!(
        mock.last_request().unwrap().messages,
        vec![Message::user_text("hello")]
    );
}

#[test]
fn test_stream_tool_loop_limit() {
    let mock = MockProvider::new(
        (0..5)
            .map(|i| Message::tool_request(format!("tu_{i}"), "get_weather", json!({"city": "Bern"})))
            .collect(),
    );
    let mut conversation = Conversation::started_with(
        weather_bot(),
        Client::blocking(mock.clone()),
        ConversationOptions::streaming().with_max_tool_rounds(2),
        Argv::none(),
    )
    .unwrap();

    let err = conversation.resume_stream("loop").unwrap().finish().unwrap_err();
    assert!(matches!(err, ConversationError::ToolLoopLimit { rounds: 2 }));
    assert_eq!(mock.calls(), 3);
    assert!(conversation.messages().is_empty());
}

#[test]
fn test_empty_stream_is_an_error() {
    let mock = MockProvider::new(vec![Message::assistant_text("")]);
    let mut conversation = streaming(&mock);

    let err = conversation.resume_stream("hello").unwrap().finish().unwrap_err();
    assert!(matches!(err, ConversationError::EmptyReply));
    assert!(conversation.messages().is_empty());
}

#[test]
fn test_canned_reply_streams_once() {
    let bot = Bot::new(BotConfig::default()).with_preprocess_fn(|message, _| {
        (message == "PING").then(|| Intercept::canned("PONG"))
    });
    let mock = MockProvider::default();
    let mut conversation = Conversation::started_with(
        bot,
        Client::blocking(mock.clone()),
        ConversationOptions::streaming(),
        Argv::none(),
    )
    .unwrap();

    let mut stream = conversation.resume_stream("PING").unwrap();
    assert!(stream.is_canned());
    let chunks: Vec<String> = stream.by_ref().map(|chunk| chunk.unwrap()).collect();
    assert_eq!(chunks, vec!["PONG"]);
    let response = stream.finish().unwrap();

    assert!(response.is_canned());
    assert_eq!(conversation.messages().len(), 2);
    assert_eq!(conversation.messages()[1], Message::assistant_text("PONG"));
    assert_eq!(mock.calls(), 0);
}

#[test]
fn test_flat_entry_point_on_streaming_conversation() {
    let mock = MockProvider::default();
    let mut conversation = streaming(&mock);
    assert!(matches!(
        conversation.resume("hi"),
        Err(ConversationError::StreamingMismatch { .. })
    ));

    let mut flat = Conversation::started_with(
        Bot::new(BotConfig::default()),
        Client::blocking(mock.clone()),
        ConversationOptions::default(),
        Argv::none(),
    )
    .unwrap();
    assert!(matches!(
        flat.resume_stream("hi").err(),
        Some(ConversationError::StreamingMismatch { .. })
    ));
}

#[test]
fn test_callbacks_run_on_commit_only() {
    let mock = MockProvider::default().with_stream_failure_after(1);
    let mut conversation = streaming(&mock);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    conversation.register_callback(move |_, response| {
        log.lock().unwrap().push(response.text());
        Ok(())
    });

    let _ = conversation.resume_stream("hello").unwrap().finish();
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_async_stream_commits() -> Result<()> {
    let mock = MockProvider::default();
    let mut conversation = async_streaming(&mock);

    let mut stream = conversation.aresume_stream("hello").await?;
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    let response = stream.finish().await?;

    assert_eq!(text, response.text());
    assert_eq!(conversation.messages().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_async_stream_failure_rolls_back() -> Result<()> {
    let mock = MockProvider::default().with_stream_failure_after(2);
    let mut conversation = async_streaming(&mock);

    let err = conversation.aresume_stream("hello").await?.finish().await.unwrap_err();
    assert!(matches!(err, ConversationError::Backend(_)));
    assert!(conversation.messages().is_empty());

    let mut conversation = async_streaming(&MockProvider::default());
    let response = conversation.astart_stream(Argv::none(), "hi").await;
    assert!(matches!(response, Err(ConversationError::AlreadyStarted)));
    Ok(())
}

#[tokio::test]
async fn test_async_stream_tool_loop() -> Result<()> {
    let mock = MockProvider::new(vec![Message::tool_request(
        "tu_1",
        "get_weather",
        json!({"city": "Cairo"}),
    )]);
    let mut conversation = Conversation::started_with(
        weather_bot(),
        Client::asynchronous(mock.clone()),
        ConversationOptions::streaming(),
        Argv::none(),
    )?;

    let mut stream = conversation.aresume_stream("weather?").await?;
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    let response = stream.finish().await?;

    assert_eq!(text, "Tool response was:sunny in Cairo");
    assert_eq!(response.text(), text);
    assert_eq!(mock.calls(), 2);
    assert_eq!(conversation.messages().len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_async_stream_client_tool() -> Result<()> {
    let mock = MockProvider::new(vec![Message::tool_request("tu_nav", "navigate", json!({}))]);
    let mut conversation = Conversation::started_with(
        navigation_bot(),
        Client::asynchronous(mock.clone()),
        ConversationOptions::streaming(),
        Argv::none(),
    )?;

    let response = conversation.aresume_stream("go").await?.finish().await?;
    assert!(response.is_canned());
    assert_eq!(response.text(), "@@@@NAVIGATE /xyz/xyz/");
    assert_eq!(mock.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_blocking_stream_on_async_client() {
    let mut conversation = async_streaming(&MockProvider::default());
    assert!(matches!(
        conversation.resume_stream("hi").err(),
        Some(ConversationError::SyncAsyncMismatch { .. })
    ));
}
