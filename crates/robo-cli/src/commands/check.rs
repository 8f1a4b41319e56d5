use anyhow::Result;
use robo::config::Settings;
use robo::{Argv, Bot, BotConfig, Conversation};

use super::{anthropic_client, options};

const CHECKER_PROMPT: &str = r#"You are a test assistant. Respond with "OK" and nothing more."#;

pub fn api_checker() -> Bot {
    Bot::new(BotConfig {
        name: "APIChecker".to_string(),
        ..Default::default()
    })
    .with_system_prompt(CHECKER_PROMPT)
}

pub async fn run(settings: &Settings) -> Result<()> {
    let mut conversation = Conversation::with_options(
        api_checker(),
        anthropic_client(settings)?,
        options(settings, false),
    );
    let response = conversation.astart(Argv::none(), "hello").await?;
    println!("{}", response.text());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use robo::models::message::Message;
    use robo::providers::mock::MockProvider;
    use robo::Client;

    #[tokio::test]
    async fn test_checker_sends_hello() -> Result<()> {
        let mock = MockProvider::new(vec![Message::assistant_text("OK")]);
        let mut conversation = Conversation::new(api_checker(), Client::asynchronous(mock.clone()));

        let response = conversation.astart(Argv::none(), "hello").await?;
        assert_eq!(response.text(), "OK");

        let request = mock.last_request().unwrap();
        assert_eq!(request.system.text(), CHECKER_PROMPT);
        assert_eq!(request.messages, vec![Message::user_text("hello")]);
        Ok(())
    }
}
