use quotetier_core::Engine;

use crate::cli::QuoteArgs;
use crate::error::CliError;
use crate::output::EnvelopeError;

use super::{parse_ticker, CommandResult};

/// Resolve each ticker in turn; a ticker that cannot be resolved is reported
/// in `errors` without failing the others.
pub async fn run(args: &QuoteArgs, engine: &Engine) -> Result<CommandResult, CliError> {
    let tickers = args
        .tickers
        .iter()
        .map(|raw| parse_ticker(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut quotes = Vec::with_capacity(tickers.len());
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    for ticker in &tickers {
        match engine.resolver.get_current(ticker).await {
            Ok(point) => {
                if point.is_stale() {
                    warnings.push(format!(
                        "{ticker}: upstream unavailable, serving stored price from {}",
                        point.timestamp()
                    ));
                }
                quotes.push(point);
            }
            Err(error) => errors.push(EnvelopeError {
                code: error.code().to_owned(),
                message: error.to_string(),
                ticker: Some(ticker.to_string()),
            }),
        }
    }

    let mut result = CommandResult::ok("quote", serde_json::to_value(&quotes)?);
    for warning in warnings {
        result = result.with_warning(warning);
    }
    for error in errors {
        result = result.with_error(error);
    }
    Ok(result)
}
