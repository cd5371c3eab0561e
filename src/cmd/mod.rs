//! CLI command implementations.
//!
//! | Module  | Commands handled |
//! |---------|------------------|
//! | `serve` | `Serve`          |
//! | `init`  | `Init`           |
//! | `token` | `Token`          |

pub mod init;
pub mod serve;
pub mod token;

use std::path::Path;

use anyhow::Result;
use kanban::config::ServiceConfig;

pub use init::cmd_init;
pub use serve::cmd_serve;
pub use token::cmd_token;

/// File (if any), then `.env` and the process environment.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let mut config = ServiceConfig::load_or_default(path)?;
    config.apply_env()?;
    Ok(config)
}
