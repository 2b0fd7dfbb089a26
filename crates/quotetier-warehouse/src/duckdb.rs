//! Pooled `DuckDB` connections for the warm store.
//!
//! Every pooled connection is a clone of one root connection, so readers and
//! writers share a single database instance and observe each other's commits.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ::duckdb::Connection;

struct PoolState {
    root: Option<Connection>,
    idle: Vec<Connection>,
}

struct PoolInner {
    db_path: PathBuf,
    max_idle: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    // A poisoned lock only means another thread panicked while parking a
    // connection; the idle list itself stays consistent.
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Small connection pool over a single `DuckDB` database file.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db_path: path.into(),
                max_idle: max_idle.max(1),
                state: Mutex::new(PoolState {
                    root: None,
                    idle: Vec::new(),
                }),
            }),
        }
    }

    /// Take an idle connection, cloning a fresh one from the root when none is idle.
    ///
    /// # Errors
    /// Returns an error when the database file cannot be opened or configured.
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let mut state = self.inner.state();
        let connection = match state.idle.pop() {
            Some(connection) => connection,
            None => {
                let root = match state.root.take() {
                    Some(root) => root,
                    None => open_root(self.inner.db_path.as_path())?,
                };
                let cloned = root.try_clone();
                state.root = Some(root);
                cloned?
            }
        };
        drop(state);

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    /// Number of idle connections currently parked in the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.state().idle.len()
    }
}

/// Connection on loan from the pool; parked again on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        // `connection` is only taken in `drop`.
        match self.connection.as_ref() {
            Some(connection) => connection,
            None => unreachable!("pooled connection accessed after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut state = self.pool.state();
        if state.idle.len() < self.pool.max_idle {
            state.idle.push(connection);
        }
    }
}

fn open_root(path: &Path) -> Result<Connection, ::duckdb::Error> {
    let connection = Connection::open(path)?;
    connection.execute_batch("PRAGMA disable_progress_bar;")?;
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn released_connections_are_parked_up_to_the_idle_limit() {
        let temp = tempdir().expect("tempdir");
        let manager = DuckDbConnectionManager::new(temp.path().join("pool.duckdb"), 1);

        {
            let first = manager.acquire().expect("open");
            let second = manager.acquire().expect("clone");
            first.execute_batch("SELECT 1").expect("query");
            second.execute_batch("SELECT 2").expect("query");
        }

        assert_eq!(manager.idle_count(), 1);
    }

    #[test]
    fn clones_share_one_database_instance() {
        let temp = tempdir().expect("tempdir");
        let manager = DuckDbConnectionManager::new(temp.path().join("shared.duckdb"), 2);

        let writer = manager.acquire().expect("writer");
        let reader = manager.acquire().expect("reader");
        writer
            .execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (7);")
            .expect("write");

        let value: i32 = reader
            .query_row("SELECT v FROM t", [], |row| row.get(0))
            .expect("read");
        assert_eq!(value, 7);
    }
}
