//! SQLite artifact database fixtures

use super::constants::*;
use audio_url_refresher::artifact_store::{
    Artifact, ArtifactFamily, ArtifactId, ConnectionPool, SqliteArtifactStore,
};
use audio_url_refresher::clock::{Clock, FixedClock};
use audio_url_refresher::url_refresh::{ExpiryScanner, RefreshCoordinator, RunLimits, UrlRefresher};
use audio_url_refresher::url_signer::SignedUrlProvider;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A fresh artifact database in a temp dir, with a connection pool over it.
pub struct TestArtifactDb {
    pub pool: ConnectionPool,
    pub path: PathBuf,
    pub clock: Arc<FixedClock>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestArtifactDb {
    pub fn create() -> Self {
        Self::with_pool_size(2)
    }

    pub fn with_pool_size(size: usize) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("artifacts.db");
        let pool = ConnectionPool::open(&path, size, Duration::from_secs(2)).unwrap();
        Self {
            pool,
            path,
            clock: Arc::new(FixedClock::new(now())),
            _temp_dir: temp_dir,
        }
    }

    /// Side connection for seeding and tampering, outside the pool.
    pub fn raw_connection(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }

    /// Inserts an owning record with its payload columns filled in.
    pub fn seed(
        &self,
        family: ArtifactFamily,
        id: &str,
        storage_path: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        let conn = self.raw_connection();
        let access_url = expires_at.map(|_| format!("https://old.test/{}", id));
        let expires_ms = expires_at.map(|t| t.timestamp_millis());
        match family {
            ArtifactFamily::AudioRecords => conn.execute(
                "INSERT INTO audio_records (id, word, storage_path, audio_url, url_expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, format!("word-{}", id), storage_path, access_url, expires_ms],
            ),
            ArtifactFamily::FlashcardQuestions => conn.execute(
                "INSERT INTO flashcards (id, question, answer, question_audio_storage_path, \
                 question_audio_url, question_audio_url_expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, "question?", "answer", storage_path, access_url, expires_ms],
            ),
            ArtifactFamily::Chunks => conn.execute(
                "INSERT INTO chunks (id, text, audio_storage_path, audio_url, audio_url_expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, "some chunk text", storage_path, access_url, expires_ms],
            ),
        }
        .unwrap();
    }

    pub fn delete(&self, family: ArtifactFamily, id: &str) {
        let table = family.columns().table;
        self.raw_connection()
            .execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![id])
            .unwrap();
    }

    pub fn store(&self, family: ArtifactFamily) -> SqliteArtifactStore {
        SqliteArtifactStore::new(self.pool.clone(), family)
    }

    pub async fn get(&self, family: ArtifactFamily, id: &str) -> Option<Artifact> {
        self.store(family)
            .get_artifact(&ArtifactId::new(id))
            .await
            .unwrap()
    }

    pub fn coordinator(
        &self,
        family: ArtifactFamily,
        signer: Arc<dyn SignedUrlProvider>,
    ) -> RefreshCoordinator {
        self.coordinator_with_limits(family, signer, RunLimits::default())
    }

    pub fn coordinator_with_limits(
        &self,
        family: ArtifactFamily,
        signer: Arc<dyn SignedUrlProvider>,
        limits: RunLimits,
    ) -> RefreshCoordinator {
        let clock: Arc<dyn Clock> = self.clock.clone();
        RefreshCoordinator::new(
            Arc::new(self.store(family)),
            ExpiryScanner::new(clock.clone(), chrono::Duration::days(LOOKAHEAD_DAYS)),
            UrlRefresher::new(signer, clock.clone(), VALIDITY).unwrap(),
            clock,
            limits,
        )
    }
}
