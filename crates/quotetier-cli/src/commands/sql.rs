use quotetier_core::{EngineConfig, QueryGuardrails, Warehouse};
use serde_json::json;

use crate::cli::SqlArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &SqlArgs, config: &EngineConfig) -> Result<CommandResult, CliError> {
    let query = args.query.trim().to_owned();
    if query.is_empty() {
        return Err(CliError::Command(String::from("query must not be empty")));
    }

    let warehouse_config = config.warehouse.to_warehouse_config();
    let guardrails = QueryGuardrails {
        max_rows: args.max_rows,
        query_timeout_ms: args.query_timeout_ms,
    };
    let allow_write = args.write;

    let result = tokio::task::spawn_blocking(move || {
        let warehouse = Warehouse::open(warehouse_config)?;
        warehouse.execute_query(&query, guardrails, allow_write)
    })
    .await
    .map_err(|e| CliError::Command(format!("query task failed: {e}")))??;

    let truncated = result.truncated;
    let row_count = result.row_count;
    let mut command_result = CommandResult::ok(
        "sql",
        json!({
            "columns": result.columns,
            "rows": result.rows,
            "row_count": row_count,
            "truncated": truncated,
        }),
    );
    if truncated {
        command_result = command_result.with_warning(format!(
            "result truncated at {row_count} rows (use --max-rows to increase limit)"
        ));
    }
    Ok(command_result)
}
