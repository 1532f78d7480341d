use super::models::{Artifact, ArtifactFamily, ArtifactId};
use super::pool::ConnectionPool;
use super::{ArtifactSession, ArtifactStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool::unmanaged::Object;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Artifact store for one family, backed by the shared connection pool.
#[derive(Clone)]
pub struct SqliteArtifactStore {
    family: ArtifactFamily,
    pool: ConnectionPool,
}

impl SqliteArtifactStore {
    pub fn new(pool: ConnectionPool, family: ArtifactFamily) -> Self {
        Self { family, pool }
    }

    /// Reads one artifact regardless of its expiry.
    pub async fn get_artifact(&self, id: &ArtifactId) -> Result<Option<Artifact>, StoreError> {
        let conn = self.pool.get().await?;
        let cols = self.family.columns();
        let sql = format!(
            "SELECT id, {path}, {url}, {exp} FROM {table} WHERE id = ?1",
            path = cols.storage_path,
            url = cols.access_url,
            exp = cols.url_expires_at,
            table = cols.table,
        );
        let family = self.family;
        let artifact = conn
            .query_row(&sql, params![id.as_str()], |row| row_to_artifact(row, family))
            .optional()?;
        Ok(artifact)
    }
}

#[async_trait]
impl ArtifactStore for SqliteArtifactStore {
    fn family(&self) -> ArtifactFamily {
        self.family
    }

    async fn acquire(&self) -> Result<Box<dyn ArtifactSession>, StoreError> {
        let conn = self.pool.get().await?;
        debug!("Acquired artifact connection for {}", self.family);
        Ok(Box::new(SqliteArtifactSession {
            family: self.family,
            conn: Mutex::new(conn),
        }))
    }
}

struct SqliteArtifactSession {
    family: ArtifactFamily,
    conn: Mutex<Object<Connection>>,
}

impl SqliteArtifactSession {
    fn conn(&self) -> Result<MutexGuard<'_, Object<Connection>>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("artifact connection lock poisoned".to_string()))
    }
}

impl Drop for SqliteArtifactSession {
    fn drop(&mut self) {
        debug!("Released artifact connection for {}", self.family);
    }
}

#[async_trait]
impl ArtifactSession for SqliteArtifactSession {
    async fn find_expiring(&self, cutoff: DateTime<Utc>) -> Result<Vec<Artifact>, StoreError> {
        let cols = self.family.columns();
        let sql = format!(
            "SELECT id, {path}, {url}, {exp} FROM {table} \
             WHERE {exp} IS NOT NULL AND {exp} < ?1 \
             AND {path} IS NOT NULL AND TRIM({path}) != '' \
             ORDER BY {exp} ASC",
            path = cols.storage_path,
            url = cols.access_url,
            exp = cols.url_expires_at,
            table = cols.table,
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let family = self.family;
        let artifacts = stmt
            .query_map(params![cutoff.timestamp_millis()], |row| {
                row_to_artifact(row, family)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(artifacts)
    }

    async fn update_url(
        &self,
        id: &ArtifactId,
        access_url: &str,
        url_expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let cols = self.family.columns();
        let sql = format!(
            "UPDATE {table} SET {url} = ?1, {exp} = ?2 WHERE id = ?3",
            table = cols.table,
            url = cols.access_url,
            exp = cols.url_expires_at,
        );

        let conn = self.conn()?;
        let updated = conn.execute(
            &sql,
            params![access_url, url_expires_at.timestamp_millis(), id.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }
}

fn row_to_artifact(row: &rusqlite::Row, family: ArtifactFamily) -> rusqlite::Result<Artifact> {
    let id = ArtifactId::new(row.get::<_, String>(0)?);
    let expires_ms: Option<i64> = row.get(3)?;
    let url_expires_at = expires_ms.and_then(|ms| {
        let parsed = DateTime::from_timestamp_millis(ms);
        if parsed.is_none() {
            warn!(
                "Ignoring out-of-range URL expiry {} on {} artifact {}",
                ms, family, id
            );
        }
        parsed
    });
    Ok(Artifact {
        id,
        family,
        storage_path: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        access_url: row.get(2)?,
        url_expires_at,
    })
}
