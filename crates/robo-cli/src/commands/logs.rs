use std::path::PathBuf;

use anyhow::Result;
use robo::persistence::LogStore;

use crate::render;

pub fn run(logs_dir: PathBuf) -> Result<()> {
    let store = LogStore::new(logs_dir)?;
    let ids = store.list()?;
    if ids.is_empty() {
        render::notice(&format!("no conversations logged in {}", store.dir().display()));
    }
    for id in ids {
        let record = store.read(&store.locate(&id)?)?;
        println!(
            "{}  {}  {:<16} {} messages",
            id,
            record.when.format("%Y-%m-%d %H:%M"),
            record.with,
            record.messages.len()
        );
    }
    Ok(())
}
