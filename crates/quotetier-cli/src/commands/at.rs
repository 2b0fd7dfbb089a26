use quotetier_core::Engine;

use crate::cli::AtArgs;
use crate::error::CliError;

use super::{parse_instant, parse_ticker, CommandResult};

pub async fn run(args: &AtArgs, engine: &Engine) -> Result<CommandResult, CliError> {
    let ticker = parse_ticker(&args.ticker)?;
    let at = parse_instant(&args.timestamp)?;

    let point = engine.resolver.get_at(&ticker, at).await?;
    Ok(CommandResult::ok("at", serde_json::to_value(&point)?))
}
