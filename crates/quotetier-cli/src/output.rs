use std::io::Write;
use std::time::Duration;

use quotetier_core::UtcDateTime;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::commands::CommandResult;
use crate::error::CliError;

/// Per-item failure reported alongside partial results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub request_id: Uuid,
    pub command: &'static str,
    pub generated_at: UtcDateTime,
    pub latency_ms: u64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub meta: Meta,
    pub data: Value,
    pub errors: Vec<EnvelopeError>,
}

impl Envelope {
    pub fn new(result: CommandResult, elapsed: Duration) -> Self {
        Self {
            meta: Meta {
                request_id: Uuid::new_v4(),
                command: result.command,
                generated_at: UtcDateTime::now(),
                latency_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                warnings: result.warnings,
            },
            data: result.data,
            errors: result.errors,
        }
    }
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    println!("{payload}");
    Ok(())
}

/// Write one NDJSON line and flush, for long-running commands.
pub fn emit_line<T: Serialize>(value: &T) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer(&mut handle, value)?;
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}
