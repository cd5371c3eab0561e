//! Development token command, `kanban token`.

use anyhow::{Result, bail};
use kanban::board::auth::{Actor, TokenIssuer};
use kanban::config::{MAX_TOKEN_TTL_MINUTES, ServiceConfig};

/// Prints only the token so the output can be captured by scripts.
pub fn cmd_token(config: &ServiceConfig, sub: i64, ttl_minutes: Option<i64>) -> Result<()> {
    config.validate()?;
    if sub <= 0 {
        bail!("--sub must be a positive user id, got {}", sub);
    }
    let ttl = ttl_minutes.unwrap_or(config.access_token_expire_minutes);
    if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&ttl) {
        bail!(
            "--ttl-minutes must be between 1 and {}, got {}",
            MAX_TOKEN_TTL_MINUTES,
            ttl
        );
    }

    let issuer = TokenIssuer::from_config(config)?;
    let token = issuer.issue_for_minutes(Actor(sub), ttl)?;
    println!("{}", token);
    Ok(())
}
