//! Service configuration.
//!
//! Values are layered, later sources winning:
//! defaults → TOML file → `.env` / process environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! database_path = "data/kanban.db"
//! secret_key = "shared-with-identity-service"
//! algorithm = "HS256"
//! access_token_expire_minutes = 30
//! env = "production"
//! debug = false
//! cors_origins = ["https://board.example.com"]
//! host = "0.0.0.0"
//! port = 8000
//! log_format = "json"
//! log_dir = "/var/log/kanban"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::board::auth::parse_algorithm;
use crate::telemetry::LogFormat;

pub const DEFAULT_CONFIG_FILE: &str = "kanban.toml";
pub const DEFAULT_SECRET_KEY: &str = "change-this-in-production";
/// Longest token lifetime accepted, one year.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub database_path: PathBuf,
    /// Shared HMAC secret used by the identity service to sign tokens.
    pub secret_key: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    pub env: String,
    pub debug: bool,
    pub project_name: String,
    pub version: String,
    pub cors_origins: Vec<String>,
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    /// When set, logs are also written to a daily-rolling file here.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("kanban.db"),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            env: "development".to_string(),
            debug: true,
            project_name: "Kanban Service".to_string(),
            version: "1.0.0".to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8000".to_string(),
            ],
            host: "127.0.0.1".to_string(),
            port: 8000,
            log_format: LogFormat::Pretty,
            log_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse kanban.toml")
    }

    /// An explicit path must exist; otherwise `kanban.toml` in the working
    /// directory is used when present, and defaults when not.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Overlay values from the process environment, after reading `.env`.
    pub fn apply_env(&mut self) -> Result<()> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, which maps variable names to values.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SECRET_KEY") {
            self.secret_key = v;
        }
        if let Some(v) = lookup("ALGORITHM") {
            self.algorithm = v;
        }
        if let Some(v) = lookup("ACCESS_TOKEN_EXPIRE_MINUTES") {
            self.access_token_expire_minutes = v
                .trim()
                .parse()
                .with_context(|| format!("ACCESS_TOKEN_EXPIRE_MINUTES is not a number: '{}'", v))?;
        }
        if let Some(v) = lookup("ENV") {
            self.env = v;
        }
        if let Some(v) = lookup("DEBUG") {
            self.debug = parse_bool(&v)
                .with_context(|| format!("DEBUG is not a boolean: '{}'", v))?;
        }
        if let Some(v) = lookup("PROJECT_NAME") {
            self.project_name = v;
        }
        if let Some(v) = lookup("CORS_ORIGINS") {
            self.cors_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = v
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port: '{}'", v))?;
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.log_format = v
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid LOG_FORMAT")?;
        }
        if let Some(v) = lookup("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }

    /// Rejects settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if let Err(e) = parse_algorithm(&self.algorithm) {
            problems.push(e.to_string());
        }
        if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&self.access_token_expire_minutes) {
            problems.push(format!(
                "access_token_expire_minutes must be between 1 and {}, got {}",
                MAX_TOKEN_TTL_MINUTES, self.access_token_expire_minutes
            ));
        }
        if self.secret_key.is_empty() {
            problems.push("secret_key must not be empty".to_string());
        } else if self.is_production() && self.secret_key == DEFAULT_SECRET_KEY {
            problems.push("secret_key must be changed from the default in production".to_string());
        }

        if !problems.is_empty() {
            bail!("Invalid configuration: {}", problems.join("; "));
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
