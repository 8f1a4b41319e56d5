use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use robo::config::Settings;
use robo::{Argv, Conversation};
use tracing::warn;

use super::{anthropic_client, options};
use crate::bot_file::BotFile;
use crate::render;
use crate::InterlocuteArgs;

const STOP: &str = "STOP";
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(90);

/// The first bot is under test; the second plays its user. The second bot
/// opens by answering the first bot's welcome message, and the two then
/// alternate until one of them says STOP or the turns run out. An optional
/// third bot is then shown the whole exchange and asked for its assessment.
pub async fn run(settings: &Settings, args: InterlocuteArgs) -> Result<()> {
    let file_a = BotFile::load(&args.bot_a)?;
    let file_b = BotFile::load(&args.bot_b)?;
    let file_c = args.bot_c.as_deref().map(BotFile::load).transpose()?;

    let opening = args
        .message
        .or_else(|| file_a.config.welcome_message.clone())
        .context("The first bot has no welcome_message; pass one with --message")?;

    let mut assistant = started(settings, file_a)?;
    let mut user = started(settings, file_b)?;
    let mut transcript = Vec::new();

    let mut last = say(&mut user, &opening, RATE_LIMIT_WAIT).await?;
    println!("{} {}\n", render::speaker(user.bot().name(), false), last);
    transcript.push((user.bot().name().to_string(), last.clone()));

    let mut assistant_turn = true;
    for turn in 0..args.turns {
        if last.trim() == STOP {
            break;
        }
        let speaking = if assistant_turn {
            &mut assistant
        } else {
            &mut user
        };
        last = say(speaking, &last, RATE_LIMIT_WAIT).await?;
        println!(
            "{} {}\n",
            render::speaker(speaking.bot().name(), turn % 2 == 0),
            last
        );
        transcript.push((speaking.bot().name().to_string(), last.clone()));
        assistant_turn = !assistant_turn;
    }

    if let Some(file_c) = file_c {
        let mut assessor = started(settings, file_c)?;
        let assessment = say(&mut assessor, &exchange_log(&transcript), RATE_LIMIT_WAIT).await?;
        println!("{} {}\n", render::speaker(assessor.bot().name(), true), assessment);
    }
    Ok(())
}

fn started(settings: &Settings, file: BotFile) -> Result<Conversation> {
    let argv = Argv::from(file.test_argv.clone());
    Ok(Conversation::started_with(
        file.into_bot()?,
        anthropic_client(settings)?,
        options(settings, false),
        argv,
    )?)
}

/// One turn, waited out and tried again for as long as the backend is
/// rate limiting. A failed turn leaves the transcript untouched.
async fn say(conversation: &mut Conversation, text: &str, wait: Duration) -> Result<String> {
    loop {
        match conversation.aresume(text).await {
            Ok(response) => return Ok(response.text()),
            Err(err) if err.is_rate_limited() => {
                warn!(bot = %conversation.bot().name(), "rate limited");
                println!(
                    "{} Got rate limit error, waiting {} seconds",
                    style("SYSTEM:").red().bold(),
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// The exchange as the assessor sees it, one speaker per paragraph
fn exchange_log(transcript: &[(String, String)]) -> String {
    transcript
        .iter()
        .map(|(speaker, text)| format!("{speaker}: {text}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}
