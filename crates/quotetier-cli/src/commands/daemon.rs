use quotetier_core::Engine;
use serde_json::json;

use crate::cli::RefreshArgs;
use crate::error::CliError;
use crate::output;

use super::{watch_all, CommandResult};

/// Stream one NDJSON line per run outcome until ctrl-c, then stop the timer.
pub async fn run(args: &RefreshArgs, engine: &Engine) -> Result<CommandResult, CliError> {
    watch_all(engine, &args.tickers).await?;

    let mut handle = engine.scheduler.start()?;
    tracing::info!(
        cron = %engine.scheduler.config().cron_expression,
        "refresh daemon started"
    );

    let mut runs = 0_usize;
    loop {
        tokio::select! {
            outcome = handle.summaries.recv() => {
                let Some(outcome) = outcome else { break };
                runs += 1;
                output::emit_line(&outcome)?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("interrupt received, stopping refresh daemon");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(CommandResult::ok("daemon", json!({ "runs": runs })))
}
