//! Server and database bootstrap commands: `jira-lite serve`, `jira-lite init`.

use anyhow::{Context, Result};
use std::path::Path;

use jira_lite::board::db::BoardDb;
use jira_lite::config::AppConfig;

pub async fn cmd_serve(config: &AppConfig) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    jira_lite::board::server::start_server(config.server_config()).await
}

pub fn cmd_init(config: &AppConfig) -> Result<()> {
    let path = &config.database.path;
    open_db(path)?;
    println!("Database initialized at {}", path.display());
    Ok(())
}

/// Open (creating if needed) the database file and its parent directory.
pub fn open_db(path: &Path) -> Result<BoardDb> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    BoardDb::new(path)
}
