//! Operator provisioning of identity records: `jira-lite user add`,
//! `jira-lite session issue`. In production the identity provider writes
//! these rows.

use anyhow::{Context, Result, bail};

use jira_lite::board::{db, session, validation};
use jira_lite::config::AppConfig;

use super::serve::open_db;

pub fn cmd_user_add(config: &AppConfig, email: &str, name: Option<&str>) -> Result<()> {
    let email = validation::email(email)?;
    let board = open_db(&config.database.path)?;

    let user = board
        .unit_of_work(|conn| {
            if db::active_user_by_email(conn, &email)?.is_some() {
                return Err(jira_lite::errors::BoardError::Conflict(format!(
                    "user {email} already exists"
                )));
            }
            session::create_user(conn, &email, name)
        })
        .context("Failed to add user")?;

    tracing::info!(user_id = user.id, "User added");
    println!("Added user {} ({})", user.email, user.id);
    Ok(())
}

pub fn cmd_session_issue(config: &AppConfig, email: &str, days: i64) -> Result<()> {
    if days < 1 {
        bail!("--days must be at least 1");
    }
    let board = open_db(&config.database.path)?;

    let token = board
        .unit_of_work(|conn| {
            let user = db::active_user_by_email(conn, email)?
                .ok_or(jira_lite::errors::BoardError::NotFound)?;
            session::issue_session(conn, user.id, days)
        })
        .with_context(|| format!("Failed to issue a session for {}", email))?;

    println!("{}", token);
    Ok(())
}
