use quotetier_core::{Engine, RangePage};
use serde_json::json;

use crate::cli::RangeArgs;
use crate::error::CliError;

use super::{parse_instant, parse_ticker, CommandResult};

pub async fn run(args: &RangeArgs, engine: &Engine) -> Result<CommandResult, CliError> {
    let ticker = parse_ticker(&args.ticker)?;
    let start = parse_instant(&args.start)?;
    let end = parse_instant(&args.end)?;

    if args.all {
        let points = engine.resolver.get_range(&ticker, start, end).await?;
        let cap = engine.resolver.config().max_range_points;
        let mut result = CommandResult::ok(
            "range",
            json!({ "points": points, "next_after": null }),
        );
        if points.len() == cap {
            result = result.with_warning(format!(
                "range capped at {cap} points; narrow the window or page with --after"
            ));
        }
        return Ok(result);
    }

    let after = args.after.as_deref().map(parse_instant).transpose()?;
    let page: RangePage = engine.resolver.range_page(&ticker, start, end, after).await?;
    Ok(CommandResult::ok("range", serde_json::to_value(&page)?))
}
