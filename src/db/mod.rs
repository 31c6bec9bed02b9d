use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tokio::task;
use crate::error::{CamwatchError, Result};

/// SQLite database handle
///
/// Constructed once at startup and passed to whatever needs the record store.
/// Each operation opens its own connection on a blocking thread.
#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

const PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA busy_timeout = 5000;";

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the standard pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        open_with_pragmas(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = open_with_pragmas(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CamwatchError::Config(format!("database task join: {}", e)))?
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        self.with_connection(|conn| migrate::run_migrations(conn)).await
    }
}

fn open_with_pragmas(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path).map_err(CamwatchError::Database)?;
    conn.execute_batch(PRAGMAS)?;
    Ok(conn)
}

pub mod migrate;
