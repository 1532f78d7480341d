use super::schema::ARTIFACT_VERSIONED_SCHEMAS;
use super::StoreError;
use crate::sqlite_persistence::open_versioned;
use anyhow::{bail, Context, Result};
use deadpool::unmanaged::{Object, Pool};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
}

/// A fixed set of SQLite connections to the artifact database.
///
/// Connections go back to the pool when the [`Object`] handed out by
/// [`ConnectionPool::get`] is dropped.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<Connection>,
    acquire_timeout: Duration,
    path: PathBuf,
}

impl ConnectionPool {
    /// Opens `size` connections to the database at `path`, creating or
    /// migrating its schema first.
    pub fn open<P: AsRef<Path>>(path: P, size: usize, acquire_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if size == 0 {
            bail!("Artifact connection pool size must be at least 1");
        }

        let mut first = Self::open_connection(&path)?;
        open_versioned(&mut first, ARTIFACT_VERSIONED_SCHEMAS, "artifact")?;

        let mut connections = Vec::with_capacity(size);
        connections.push(first);
        for _ in 1..size {
            connections.push(Self::open_connection(&path)?);
        }
        info!(
            "Opened artifact database at {:?} with {} pooled connections",
            path, size
        );

        Ok(Self {
            pool: Pool::from(connections),
            acquire_timeout,
            path,
        })
    }

    fn open_connection(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open artifact database at {:?}", path))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Waits up to the configured acquire timeout for a free connection.
    pub async fn get(&self) -> Result<Object<Connection>, StoreError> {
        match tokio::time::timeout(self.acquire_timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(err)) => Err(StoreError::Unavailable(format!(
                "connection pool for {:?}: {}",
                self.path, err
            ))),
            Err(_) => Err(StoreError::Unavailable(format!(
                "timed out after {:?} waiting for a connection to {:?}",
                self.acquire_timeout, self.path
            ))),
        }
    }

    /// Stops handing out connections. Pending and future `get` calls fail.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
