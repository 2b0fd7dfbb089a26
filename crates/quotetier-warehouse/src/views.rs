//! Read-only views exposed to the `sql` command.

use ::duckdb::Connection;

/// Create views over the price tables.
///
/// - `vw_latest_prices`: newest observation per ticker
/// - `vw_ingest_batches`: committed rows per refresh batch
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW vw_latest_prices AS
SELECT ticker, ts_us, interval, price, currency, source
FROM (
    SELECT *, ROW_NUMBER() OVER (PARTITION BY ticker ORDER BY ts_us DESC) AS rn
    FROM price_points
)
WHERE rn = 1;

CREATE OR REPLACE VIEW vw_ingest_batches AS
SELECT
    batch_id,
    COUNT(*) AS rows_committed,
    COUNT(DISTINCT ticker) AS tickers,
    MIN(logged_at) AS first_logged_at
FROM ingest_log
GROUP BY batch_id;
",
    )?;

    Ok(())
}
