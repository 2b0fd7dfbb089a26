use std::str::FromStr;

use quotetier_core::{BackfillOutcome, Engine, Interval};

use crate::cli::BackfillArgs;
use crate::error::CliError;

use super::{parse_ticker, CommandResult};

pub async fn run(args: &BackfillArgs, engine: &Engine) -> Result<CommandResult, CliError> {
    let ticker = parse_ticker(&args.ticker)?;
    let interval = Interval::from_str(&args.interval)?;

    let outcome = engine.resolver.backfill(&ticker, interval).await?;
    let mut result = CommandResult::ok("backfill", serde_json::to_value(&outcome)?);
    if let BackfillOutcome::Deferred { retry_after_ms } = outcome {
        result = result.with_warning(format!(
            "rate limit reached; retry in {}s",
            retry_after_ms.div_ceil(1_000)
        ));
    }
    Ok(result)
}
