use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use robo::config::Settings;
use tracing_subscriber::EnvFilter;

mod bot_file;
mod commands;
mod render;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file to read instead of ./robo.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with a bot defined in a YAML file
    Chat(ChatArgs),

    /// Let two bots talk to each other, optionally with a third to judge
    Interlocute(InterlocuteArgs),

    /// Send one message to check that the API is reachable
    #[command(name = "check-api")]
    CheckApi,

    /// List logged conversations, newest first
    Logs {
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct ChatArgs {
    /// Bot definition
    bot: PathBuf,

    /// Values for the bot's fields, in order
    #[arg(short, long = "arg")]
    args: Vec<String>,

    /// Print the reply as it arrives
    #[arg(long)]
    stream: bool,

    /// Id of a logged conversation to continue
    #[arg(long)]
    resume: Option<String>,

    #[arg(long)]
    logs_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct InterlocuteArgs {
    /// The bot under test
    bot_a: PathBuf,

    /// The bot playing the user
    bot_b: PathBuf,

    /// A bot shown the finished exchange, which replies with its assessment
    bot_c: Option<PathBuf>,

    /// Opening message, instead of the first bot's welcome message
    #[arg(short, long)]
    message: Option<String>,

    /// Maximum number of replies after the opening one
    #[arg(short, long, default_value_t = 7)]
    turns: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Chat(args) => commands::chat::run(&settings, args).await,
        Command::Interlocute(args) => commands::interlocute::run(&settings, args).await,
        Command::CheckApi => commands::check::run(&settings).await,
        Command::Logs { logs_dir } => {
            commands::logs::run(logs_dir.unwrap_or_else(|| settings.logs_dir()))
        }
    }
}
