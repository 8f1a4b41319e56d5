use anyhow::Result;
use cliclack::{input, spinner};
use futures::StreamExt;
use robo::config::Settings;
use robo::{Argv, LoggedConversation};

use super::{anthropic_client, options};
use crate::bot_file::BotFile;
use crate::render;
use crate::ChatArgs;

pub async fn run(settings: &Settings, args: ChatArgs) -> Result<()> {
    let bot = BotFile::load(&args.bot)?.into_bot()?;
    let welcome = bot.config().welcome_message.clone();
    let client = anthropic_client(settings)?;
    let options = options(settings, args.stream);
    let logs_dir = args.logs_dir.unwrap_or_else(|| settings.logs_dir());
    let argv = Argv::from(args.args);

    let mut conversation = match &args.resume {
        Some(id) => LoggedConversation::revive(bot, client, options, id, &logs_dir, argv)?,
        None => {
            let mut conversation = LoggedConversation::new(bot, client, options, &logs_dir)?;
            conversation.prestart(argv)?;
            conversation
        }
    };

    cliclack::intro(format!(
        "{} ({})",
        conversation.bot().name(),
        conversation.conversation_id()
    ))?;
    render::notice("type /exit to end the conversation");

    if args.resume.is_some() {
        for message in conversation.messages() {
            render::markdown(&format!("**{}**: {}", message.role.as_str(), message.text()))?;
        }
    } else if let Some(welcome) = welcome {
        render::markdown(&welcome)?;
    }

    loop {
        let text: String = input("You:").placeholder("").interact()?;
        let text = text.trim();
        if text.eq_ignore_ascii_case("/exit") || text.eq_ignore_ascii_case("/quit") {
            break;
        }

        if conversation.is_streaming() {
            let mut stream = conversation.aresume_stream(text).await?;
            while let Some(chunk) = stream.next().await {
                render::increment(&chunk?)?;
            }
            stream.finish().await?;
            println!();
        } else {
            let spin = spinner();
            spin.start("awaiting reply");
            let response = conversation.aresume(text).await;
            spin.stop("");
            render::markdown(&response?.text())?;
        }
    }

    cliclack::outro(format!(
        "conversation saved to {}",
        conversation.log_path().display()
    ))?;
    Ok(())
}
