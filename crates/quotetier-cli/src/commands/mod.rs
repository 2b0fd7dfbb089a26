mod at;
mod backfill;
mod daemon;
mod quote;
mod range;
mod refresh;
mod sql;
mod status;

use quotetier_core::{Engine, EngineConfig, Ticker, UtcDateTime};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::EnvelopeError;

pub struct CommandResult {
    pub command: &'static str,
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
}

impl CommandResult {
    pub fn ok(command: &'static str, data: Value) -> Self {
        Self {
            command,
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_error(mut self, error: EnvelopeError) -> Self {
        self.errors.push(error);
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let config = EngineConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Quote(args) => quote::run(args, &Engine::open(&config).await?).await,
        Command::At(args) => at::run(args, &Engine::open(&config).await?).await,
        Command::Range(args) => range::run(args, &Engine::open(&config).await?).await,
        Command::Backfill(args) => backfill::run(args, &Engine::open(&config).await?).await,
        Command::Refresh(args) => refresh::run(args, &Engine::open(&config).await?).await,
        Command::Daemon(args) => daemon::run(args, &Engine::open(&config).await?).await,
        Command::Status => status::run(&Engine::open(&config).await?).await,
        Command::Sql(args) => sql::run(args, &config).await,
    }
}

fn parse_ticker(input: &str) -> Result<Ticker, CliError> {
    Ticker::parse(input).map_err(CliError::from)
}

fn parse_instant(input: &str) -> Result<UtcDateTime, CliError> {
    UtcDateTime::parse_lenient(input).map_err(CliError::from)
}

/// Add `tickers` to the watchlist as of now.
async fn watch_all(engine: &Engine, tickers: &[String]) -> Result<(), CliError> {
    let now = UtcDateTime::now();
    for raw in tickers {
        engine.watchlist.watch(parse_ticker(raw)?, now).await;
    }
    Ok(())
}
