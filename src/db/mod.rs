//! Database layer for the project task tree.
//!
//! A file-backed [`Database`] opens one SQLite connection per unit of work so
//! that concurrent callers contend on SQLite's own locks. Every mutation runs
//! inside an `IMMEDIATE` transaction: the write lock is taken at `BEGIN`, held
//! until commit, and waited on for at most the configured lock timeout.

pub mod assignment;
pub mod audit;
pub mod hierarchy;
pub mod projects;
pub mod store;

use crate::error::ToolError;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Default bound on how long a unit of work waits for the write lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

enum Backend {
    /// One connection shared behind a mutex (in-memory databases).
    Shared(Mutex<Connection>),
    /// A fresh connection per unit of work.
    File(PathBuf),
}

/// Database handle. Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct Database {
    backend: Arc<Backend>,
    lock_timeout: Duration,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_LOCK_TIMEOUT)
    }

    /// Open or create the database, waiting at most `lock_timeout` for locks.
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, lock_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let mut conn = Connection::open(&path)?;
        // WAL is persistent, so setting it once on the first connection is enough.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        configure(&conn, lock_timeout)?;
        embedded::migrations::runner().run(&mut conn)?;

        Ok(Self {
            backend: Arc::new(Backend::File(path)),
            lock_timeout,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure(&conn, DEFAULT_LOCK_TIMEOUT)?;
        embedded::migrations::runner().run(&mut conn)?;

        Ok(Self {
            backend: Arc::new(Backend::Shared(Mutex::new(conn))),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Run a read-only function against a connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.with_conn_mut(|conn| f(conn))
    }

    /// Run a function with mutable access to a connection.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let result = match self.backend.as_ref() {
            Backend::Shared(conn) => {
                let mut conn = conn
                    .lock()
                    .map_err(|_| anyhow!("database connection mutex poisoned"))?;
                f(&mut conn)
            }
            Backend::File(path) => {
                let mut conn = Connection::open(path)?;
                configure(&conn, self.lock_timeout)?;
                f(&mut conn)
            }
        };
        result.map_err(classify)
    }

    /// Run `f` inside an `IMMEDIATE` transaction and commit if it succeeds.
    ///
    /// Any error from `f` drops the transaction, which rolls it back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

fn configure(conn: &Connection, lock_timeout: Duration) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(lock_timeout)?;
    Ok(())
}

/// Whether a SQLite error means the lock could not be acquired in time.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Lock contention becomes `LockTimeout` and any other SQLite failure
/// `DatabaseError`. Errors that already carry a code pass through.
fn classify(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(sqlite) if is_busy(sqlite) => ToolError::lock_timeout(sqlite).into(),
        Some(sqlite) => ToolError::database(sqlite).into(),
        None => err,
    }
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, error_code};
    use tempfile::TempDir;

    #[test]
    fn migrations_create_tables() {
        let db = Database::open_in_memory().unwrap();
        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(names)
            })
            .unwrap();
        for table in ["project_members", "projects", "tasks"] {
            assert!(tables.iter().any(|t| t == table), "missing {}", table);
        }
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO projects (name, user_id, is_public, created_date, updated_date)
                 VALUES ('p', 'u', 0, 0, 0)",
                [],
            )?;
            Err(anyhow!("abort"))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn held_write_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.db");
        let db = Database::open_with_timeout(&path, Duration::from_millis(50)).unwrap();

        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let err = db.with_tx(|_| Ok(())).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::LockTimeout));

        blocker.execute_batch("ROLLBACK;").unwrap();
        assert!(db.with_tx(|_| Ok(())).is_ok());
    }

    #[test]
    fn sqlite_failures_carry_database_error() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .with_conn(|conn| Ok(conn.execute("UPDATE no_such_table SET x = 1", [])?))
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::DatabaseError));
        assert!(err.to_string().contains("no_such_table"));
    }

    #[test]
    fn open_records_lock_timeout() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_with_timeout(dir.path().join("t.db"), Duration::from_millis(750))
            .unwrap();
        assert_eq!(db.lock_timeout(), Duration::from_millis(750));
        assert_eq!(Database::open_in_memory().unwrap().lock_timeout(), DEFAULT_LOCK_TIMEOUT);
    }
}
