use quotetier_core::{Engine, UtcDateTime};
use serde_json::json;

use super::CommandResult;
use crate::error::CliError;

pub async fn run(engine: &Engine) -> Result<CommandResult, CliError> {
    let now = UtcDateTime::now();
    let active = engine.watchlist.active_set(now).await;

    Ok(CommandResult::ok(
        "status",
        json!({
            "rate_limit": engine.limiter.snapshot(),
            "scheduler": {
                "state": engine.scheduler.state(),
                "enabled": engine.scheduler.config().enabled,
                "cron_expression": engine.scheduler.config().cron_expression,
            },
            "watchlist": engine.watchlist.entries().await,
            "active_count": active.len(),
            "warehouse": {
                "home": engine.warehouse.home().display().to_string(),
                "db_path": engine.warehouse.db_path().display().to_string(),
            },
        }),
    ))
}
