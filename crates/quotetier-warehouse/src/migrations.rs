use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_price_points",
        sql: r#"
CREATE TABLE IF NOT EXISTS price_points (
    ticker TEXT NOT NULL,
    ts_us BIGINT NOT NULL,
    interval TEXT NOT NULL,
    price DECIMAL(38, 10) NOT NULL,
    currency TEXT NOT NULL,
    open DECIMAL(38, 10),
    high DECIMAL(38, 10),
    low DECIMAL(38, 10),
    close DECIMAL(38, 10),
    volume BIGINT,
    source TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(ticker, ts_us)
);

CREATE TABLE IF NOT EXISTS ingest_log (
    batch_id TEXT NOT NULL,
    ticker TEXT NOT NULL,
    ts_us BIGINT NOT NULL,
    interval TEXT NOT NULL,
    status TEXT NOT NULL,
    logged_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_ingest_log_batch ON ingest_log(batch_id);
"#,
    },
];

/// Apply every migration not yet recorded in `schema_migrations`.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
        }
    }

    Ok(())
}

/// Versions known to this build, oldest first.
pub fn known_versions() -> impl Iterator<Item = &'static str> {
    MIGRATIONS.iter().map(|migration| migration.version)
}
