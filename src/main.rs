use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "kanban")]
#[command(version, about = "Workspace, project, ticket and task tracking service")]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./kanban.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a local frontend)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database schema and exit
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Mint a bearer token signed with the configured secret (development only)
    Token {
        /// User id to put in the `sub` claim
        #[arg(long)]
        sub: i64,

        /// Token lifetime in minutes (defaults to access_token_expire_minutes)
        #[arg(long)]
        ttl_minutes: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = cmd::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(db_path) = db_path {
                config.database_path = db_path;
            }
            cmd::cmd_serve(config, dev).await?;
        }
        Commands::Init { db_path } => {
            if let Some(db_path) = db_path {
                config.database_path = db_path;
            }
            cmd::cmd_init(&config)?;
        }
        Commands::Token { sub, ttl_minutes } => {
            cmd::cmd_token(&config, sub, ttl_minutes)?;
        }
    }

    Ok(())
}
