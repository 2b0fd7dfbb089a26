use quotetier_core::{Engine, RunOutcome};

use crate::cli::RefreshArgs;
use crate::error::CliError;

use super::{watch_all, CommandResult};

pub async fn run(args: &RefreshArgs, engine: &Engine) -> Result<CommandResult, CliError> {
    watch_all(engine, &args.tickers).await?;

    let outcome = engine.scheduler.run().await;
    let mut result = CommandResult::ok("refresh", serde_json::to_value(&outcome)?);
    match &outcome {
        RunOutcome::Completed(summary) if summary.paused => {
            result = result.with_warning("run paused after consecutive provider outages");
        }
        RunOutcome::Completed(summary) if summary.deferred > 0 => {
            result = result.with_warning(format!(
                "{} tickers deferred by the rate limit; the next run picks them up",
                summary.deferred
            ));
        }
        RunOutcome::Failed { error, .. } => return Err(CliError::RefreshFailed(error.clone())),
        _ => {}
    }
    Ok(result)
}
