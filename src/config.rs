//! Service configuration, read from `jira-lite.toml`.
//!
//! Layered: file → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! dev_mode = false
//!
//! [database]
//! path = ".jira-lite/board.db"
//!
//! [mail]
//! app_url = "http://localhost:3000"
//! from = "no-reply@jira-lite.local"
//!
//! [log]
//! json = false
//! ```
//!
//! A `[limits]` section is accepted and reported by `config show`, but the
//! board limits are compiled in; values that differ only produce warnings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::board::server::ServerConfig;
use crate::board::{issues, labels, projects, statuses, subtasks};

pub const CONFIG_FILE_NAME: &str = "jira-lite.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".jira-lite/board.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Board limits. Informational: the engine enforces its compiled values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_issues_per_project")]
    pub issues_per_project: i64,
    #[serde(default = "default_labels_per_project")]
    pub labels_per_project: i64,
    #[serde(default = "default_labels_per_issue")]
    pub labels_per_issue: i64,
    #[serde(default = "default_subtasks_per_issue")]
    pub subtasks_per_issue: i64,
    #[serde(default = "default_custom_statuses")]
    pub custom_statuses_per_project: i64,
    #[serde(default = "default_projects_per_team")]
    pub projects_per_team: i64,
}

fn default_issues_per_project() -> i64 {
    issues::ISSUE_LIMIT
}

fn default_labels_per_project() -> i64 {
    labels::LABEL_LIMIT
}

fn default_labels_per_issue() -> i64 {
    issues::LABELS_PER_ISSUE_LIMIT as i64
}

fn default_subtasks_per_issue() -> i64 {
    subtasks::SUBTASK_LIMIT
}

fn default_custom_statuses() -> i64 {
    statuses::CUSTOM_STATUS_LIMIT
}

fn default_projects_per_team() -> i64 {
    projects::PROJECT_LIMIT
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            issues_per_project: default_issues_per_project(),
            labels_per_project: default_labels_per_project(),
            labels_per_issue: default_labels_per_issue(),
            subtasks_per_issue: default_subtasks_per_issue(),
            custom_statuses_per_project: default_custom_statuses(),
            projects_per_team: default_projects_per_team(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailSection {
    /// Base URL used to build invite links.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    #[serde(default = "default_mail_from")]
    pub from: String,
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_mail_from() -> String {
    "no-reply@jira-lite.local".to_string()
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            app_url: default_app_url(),
            from: default_mail_from(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSection {
    /// Emit JSON log lines instead of the human format.
    #[serde(default)]
    pub json: bool,
}

/// Parsed `jira-lite.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub mail: MailSection,
    #[serde(default)]
    pub log: LogSection,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse jira-lite.toml")
    }

    /// Load `path` if it exists, else defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize jira-lite.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `JIRA_LITE_PORT`, `JIRA_LITE_DB`, `APP_URL` and `MAIL_FROM`
    /// from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup("JIRA_LITE_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid JIRA_LITE_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("JIRA_LITE_DB") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(url) = lookup("APP_URL") {
            self.mail.app_url = url;
        }
        if let Some(from) = lookup("MAIL_FROM") {
            self.mail.from = from;
        }
        Ok(())
    }

    /// Server settings for `board::server::start_server`.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            db_path: self.database.path.clone(),
            dev_mode: self.server.dev_mode,
            app_url: self.mail.app_url.clone(),
            mail_from: self.mail.from.clone(),
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0: the OS will pick a random port".to_string());
        }
        if self.server.host.trim().is_empty() {
            warnings.push("server.host is empty".to_string());
        }
        if self.database.path.as_os_str().is_empty() {
            warnings.push("database.path is empty".to_string());
        }
        if !self.mail.app_url.starts_with("http://") && !self.mail.app_url.starts_with("https://") {
            warnings.push(format!(
                "mail.app_url '{}' should start with http:// or https://",
                self.mail.app_url
            ));
        }
        if crate::board::validation::email(&self.mail.from).is_err() {
            warnings.push(format!("mail.from '{}' is not an email address", self.mail.from));
        }

        let compiled = LimitsSection::default();
        let limits = [
            ("issues_per_project", self.limits.issues_per_project, compiled.issues_per_project),
            ("labels_per_project", self.limits.labels_per_project, compiled.labels_per_project),
            ("labels_per_issue", self.limits.labels_per_issue, compiled.labels_per_issue),
            ("subtasks_per_issue", self.limits.subtasks_per_issue, compiled.subtasks_per_issue),
            (
                "custom_statuses_per_project",
                self.limits.custom_statuses_per_project,
                compiled.custom_statuses_per_project,
            ),
            ("projects_per_team", self.limits.projects_per_team, compiled.projects_per_team),
        ];
        for (name, configured, enforced) in limits {
            if configured != enforced {
                warnings.push(format!(
                    "limits.{} = {} is ignored; the enforced limit is {}",
                    name, configured, enforced
                ));
            }
        }

        warnings
    }
}
