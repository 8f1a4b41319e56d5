use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use robo::{Bot, BotConfig};
use serde::Deserialize;

/// A bot defined in YAML: the bot settings plus where its system prompt
/// comes from.
///
/// ```yaml
/// name: AnimalBot
/// fields: [ANIMAL_TYPE]
/// prompt: Respond with a sound made by a {{ANIMAL_TYPE}}.
/// ```
#[derive(Debug, Deserialize)]
pub struct BotFile {
    #[serde(flatten)]
    pub config: BotConfig,
    #[serde(default)]
    pub prompt: Option<String>,
    /// Resolved against the YAML file's directory when relative
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
    /// Field values used when the bot takes part in an interlocution
    #[serde(default)]
    pub test_argv: Vec<String>,
}

impl BotFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read bot file {}", path.display()))?;
        let mut file: BotFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid bot file {}", path.display()))?;

        if let Some(prompt_file) = file.prompt_file.take() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            file.prompt_file = Some(base.join(prompt_file));
        }
        Ok(file)
    }

    pub fn into_bot(self) -> Result<Bot> {
        let bot = Bot::new(self.config);
        Ok(match (self.prompt, self.prompt_file) {
            (Some(_), Some(_)) => bail!("A bot file may set prompt or prompt_file, not both"),
            (Some(prompt), None) => bot.with_system_prompt(prompt),
            (None, Some(path)) => bot.with_prompt_file(path),
            (None, None) => bot,
        })
    }
}
