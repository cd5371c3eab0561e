//! Database bootstrap command, `kanban init`.

use anyhow::Result;
use kanban::board::server::open_database;
use kanban::config::ServiceConfig;

pub fn cmd_init(config: &ServiceConfig) -> Result<()> {
    open_database(config)?;
    println!(
        "Board database initialized at {}",
        config.database_path.display()
    );
    Ok(())
}
