use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use jira_lite::config::{AppConfig, CONFIG_FILE_NAME};

mod cmd;

#[derive(Parser)]
#[command(name = "jira-lite")]
#[command(version, about = "Multi-tenant issue tracker with WIP-limited kanban boards")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Emit JSON log lines (overrides [log] json)
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP/WebSocket server
    Serve {
        /// Port to serve on (overrides config and JIRA_LITE_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides config and JIRA_LITE_DB)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (listen on all interfaces, permissive CORS)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and apply the schema, then exit
    Init {
        /// Database path (overrides config and JIRA_LITE_DB)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Provision user records for local use
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Issue session tokens for local use
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the resolved configuration
    Show,
    /// Print configuration warnings
    Validate,
    /// Write a default configuration file
    Init,
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// Add a user
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SessionCommands {
    /// Issue a session token for an existing user and print it
    Issue {
        #[arg(long)]
        email: String,
        /// Days until the session expires
        #[arg(long, default_value = "30")]
        days: i64,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("jira_lite=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(&cli.config)?;
    config.apply_env()?;
    init_tracing(cli.log_json || config.log.json);

    match cli.command {
        Commands::Serve { port, db_path, dev } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(path) = db_path {
                config.database.path = path;
            }
            config.server.dev_mode |= dev;
            cmd::cmd_serve(&config).await?;
        }
        Commands::Init { db_path } => {
            if let Some(path) = db_path {
                config.database.path = path;
            }
            cmd::cmd_init(&config)?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli.config, &config, command)?,
        Commands::User { command } => match command {
            UserCommands::Add { email, name } => cmd::cmd_user_add(&config, &email, name.as_deref())?,
        },
        Commands::Session { command } => match command {
            SessionCommands::Issue { email, days } => cmd::cmd_session_issue(&config, &email, days)?,
        },
    }

    Ok(())
}
