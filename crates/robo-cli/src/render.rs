use std::io::{self, Write};

use anyhow::{anyhow, Result};
use bat::WrappingMode;
use console::style;

const THEME: &str = "zenburn";

/// Print a reply as highlighted markdown
pub fn markdown(content: &str) -> Result<()> {
    bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .theme(THEME)
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print()
        .map_err(|e| anyhow!("Failed to render reply: {e}"))?;
    println!();
    Ok(())
}

/// Print one increment of a streamed reply as it arrives
pub fn increment(chunk: &str) -> Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "{chunk}")?;
    stdout.flush()?;
    Ok(())
}

pub fn speaker(name: &str, even: bool) -> String {
    let label = format!("{name}:");
    if even {
        style(label).blue().bold().to_string()
    } else {
        style(label).green().bold().to_string()
    }
}

pub fn notice(text: &str) {
    println!("{}", style(text).dim());
}
