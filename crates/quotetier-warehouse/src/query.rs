//! Guarded ad-hoc SQL over the warehouse tables and views.
//!
//! Statements are classified by their leading keyword. Read statements run
//! under a row cap and a wall-clock deadline checked between rows; anything
//! else needs an explicit write opt-in.

use std::time::{Duration, Instant};

use ::duckdb::types::Value as DuckValue;
use ::duckdb::{Connection, ToSql};
use serde::Serialize;
use serde_json::Value;

use crate::WarehouseError;

const READ_KEYWORDS: [&str; 6] = ["SELECT", "WITH", "EXPLAIN", "SHOW", "DESCRIBE", "SUMMARIZE"];
const NO_PARAMS: [&dyn ToSql; 0] = [];

/// Limits applied to ad-hoc SQL.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    pub max_rows: usize,
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            query_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

/// Rows returned by [`crate::Warehouse::execute_query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<SqlColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// More rows matched than `max_rows` allowed.
    pub truncated: bool,
}

impl QueryResult {
    fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

struct Statement<'a> {
    text: &'a str,
    access: Access,
}

impl<'a> Statement<'a> {
    fn classify(sql: &'a str) -> Result<Self, WarehouseError> {
        let text = sql.trim().trim_end_matches(';').trim_end();
        let Some(keyword) = text.split_whitespace().next() else {
            return Err(rejected("query is empty"));
        };
        let keyword = keyword.to_ascii_uppercase();
        let access = if READ_KEYWORDS.contains(&keyword.as_str()) {
            Access::Read
        } else {
            Access::Write
        };
        Ok(Self { text, access })
    }

    /// A `;` left after trimming means more than one statement.
    fn is_compound(&self) -> bool {
        self.text.contains(';')
    }
}

struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    fn start(timeout_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            limit: Duration::from_millis(timeout_ms),
        }
    }

    fn check(&self) -> Result<(), WarehouseError> {
        if self.started.elapsed() > self.limit {
            return Err(WarehouseError::QueryTimeout {
                timeout_ms: u64::try_from(self.limit.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }
}

pub(crate) fn run(
    connection: &Connection,
    sql: &str,
    guardrails: QueryGuardrails,
    allow_write: bool,
) -> Result<QueryResult, WarehouseError> {
    if guardrails.max_rows == 0 {
        return Err(rejected("max_rows must be positive"));
    }
    if guardrails.query_timeout_ms == 0 {
        return Err(rejected("query_timeout_ms must be positive"));
    }

    let statement = Statement::classify(sql)?;
    let deadline = Deadline::start(guardrails.query_timeout_ms);
    match statement.access {
        _ if statement.is_compound() && !allow_write => {
            Err(rejected("multiple statements need write access"))
        }
        Access::Read => read_rows(connection, statement.text, guardrails.max_rows, &deadline),
        Access::Write if allow_write => {
            connection.execute_batch(statement.text)?;
            deadline.check()?;
            Ok(QueryResult::empty())
        }
        Access::Write => Err(rejected(
            "only read statements are accepted without write access",
        )),
    }
}

fn read_rows(
    connection: &Connection,
    sql: &str,
    max_rows: usize,
    deadline: &Deadline,
) -> Result<QueryResult, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    // Column metadata is only known once the statement has executed.
    let _ = statement.query(NO_PARAMS)?;
    let columns = (0..statement.column_count())
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map_or_else(|_| format!("column_{index}"), ToString::to_string),
            r#type: statement.column_type(index).to_string(),
        })
        .collect::<Vec<_>>();

    let width = columns.len();
    let mut cursor = statement.query(NO_PARAMS)?;
    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = cursor.next()? {
        deadline.check()?;
        if rows.len() == max_rows {
            truncated = true;
            break;
        }
        let cells = (0..width)
            .map(|index| row.get::<_, DuckValue>(index).map(cell))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(cells);
    }
    deadline.check()?;

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    })
}

/// JSON rendering of one result cell. Decimals stay textual so stored prices
/// never pass through a float.
fn cell(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(flag) => Value::Bool(flag),
        DuckValue::TinyInt(n) => n.into(),
        DuckValue::SmallInt(n) => n.into(),
        DuckValue::Int(n) => n.into(),
        DuckValue::BigInt(n) => n.into(),
        DuckValue::UTinyInt(n) => n.into(),
        DuckValue::USmallInt(n) => n.into(),
        DuckValue::UInt(n) => n.into(),
        DuckValue::UBigInt(n) => n.into(),
        DuckValue::Float(n) => n.into(),
        DuckValue::Double(n) => n.into(),
        DuckValue::Decimal(decimal) => Value::String(decimal.to_string()),
        DuckValue::Text(text) => Value::String(text),
        DuckValue::Blob(bytes) => Value::String(hex::encode(bytes)),
        other => Value::String(format!("{other:?}")),
    }
}

fn rejected(reason: &str) -> WarehouseError {
    WarehouseError::QueryRejected(reason.to_owned())
}
