//! CLI argument definitions.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quote` | Current price through the hot, warm and upstream tiers |
//! | `at` | Stored price at or before an instant |
//! | `range` | Stored prices between two instants, paged |
//! | `backfill` | Fetch a historical series into the warehouse |
//! | `refresh` | Run the refresh job once |
//! | `daemon` | Run the refresh job on its cron schedule |
//! | `status` | Quota and watchlist state |
//! | `sql` | Query the local `DuckDB` warehouse |
//!
//! ```bash
//! quotetier quote IBM AAPL --pretty
//! quotetier at AAPL 2024-03-01T15:30:00Z
//! quotetier range AAPL --start 2024-01-01 --end 2024-03-31 --all
//! quotetier refresh --ticker IBM --ticker MSFT
//! quotetier sql "SELECT * FROM vw_latest_prices"
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "quotetier",
    author,
    version,
    about = "Tiered market-data cache in front of a rate-limited provider"
)]
pub struct Cli {
    /// TOML configuration file; `QUOTETIER_*` environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Format of the diagnostic log written to stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Current price for one or more tickers.
    Quote(QuoteArgs),
    /// Price at or before a point in time.
    At(AtArgs),
    /// Stored prices within a time range.
    Range(RangeArgs),
    /// Fetch and store a historical series.
    Backfill(BackfillArgs),
    /// Run the refresh job once and print its summary.
    Refresh(RefreshArgs),
    /// Run the refresh job on its schedule until interrupted.
    Daemon(RefreshArgs),
    /// Show rate-limit quota and watchlist state.
    Status,
    /// Execute SQL against the local warehouse.
    Sql(SqlArgs),
}

#[derive(Debug, Args)]
pub struct QuoteArgs {
    #[arg(required = true)]
    pub tickers: Vec<String>,
}

#[derive(Debug, Args)]
pub struct AtArgs {
    pub ticker: String,
    /// RFC 3339 timestamp or `YYYY-MM-DD` (midnight UTC).
    pub timestamp: String,
}

#[derive(Debug, Args)]
pub struct RangeArgs {
    pub ticker: String,

    #[arg(long)]
    pub start: String,

    #[arg(long)]
    pub end: String,

    /// Cursor from a previous page's `next_after`.
    #[arg(long, conflicts_with = "all")]
    pub after: Option<String>,

    /// Follow cursors and return the whole range.
    #[arg(long, default_value_t = false)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct BackfillArgs {
    pub ticker: String,

    #[arg(long, default_value = "1day")]
    pub interval: String,
}

#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Add a ticker to the watchlist before running; repeatable.
    #[arg(long = "ticker")]
    pub tickers: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    pub query: String,

    #[arg(long, default_value_t = 10_000)]
    pub max_rows: usize,

    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,

    /// Allow statements that modify the warehouse.
    #[arg(long, default_value_t = false)]
    pub write: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "quotetier",
            "quote",
            "IBM",
            "AAPL",
            "--pretty",
            "--log-format",
            "json",
        ])
        .expect("parse");

        assert!(cli.pretty);
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Quote(args) => assert_eq!(args.tickers, vec!["IBM", "AAPL"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn range_rejects_cursor_together_with_all() {
        let parsed = Cli::try_parse_from([
            "quotetier",
            "range",
            "AAPL",
            "--start",
            "2024-01-01",
            "--end",
            "2024-02-01",
            "--after",
            "2024-01-15T00:00:00Z",
            "--all",
        ]);

        assert!(parsed.is_err());
    }

    #[test]
    fn refresh_collects_repeated_tickers() {
        let cli = Cli::try_parse_from(["quotetier", "refresh", "--ticker", "IBM", "--ticker", "MSFT"])
            .expect("parse");

        match cli.command {
            Command::Refresh(args) => assert_eq!(args.tickers, vec!["IBM", "MSFT"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
