//! Persistence of the artifacts whose signed URLs need refreshing.
//!
//! Each artifact family lives in its own table. The refresh core only needs two
//! operations per family, a bounded scan for soon-to-expire rows and a single
//! row update, so every table is reached through the same [`ArtifactStore`] /
//! [`ArtifactSession`] pair.

mod memory_store;
mod models;
mod pool;
mod schema;
mod sqlite_artifact_store;

pub use memory_store::InMemoryArtifactStore;
pub use models::{Artifact, ArtifactFamily, ArtifactId, FamilyColumns};
pub use pool::{ConnectionPool, PoolStatus};
pub use schema::ARTIFACT_VERSIONED_SCHEMAS;
pub use sqlite_artifact_store::SqliteArtifactStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("artifact {0} not found")]
    NotFound(ArtifactId),

    #[error("artifact store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Gives out sessions against one artifact family.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn family(&self) -> ArtifactFamily;

    /// Acquires the resources for one refresh run.
    ///
    /// Resources are released when the returned session is dropped.
    async fn acquire(&self) -> Result<Box<dyn ArtifactSession>, StoreError>;
}

/// Scoped access to one artifact table for the duration of a refresh run.
#[async_trait]
pub trait ArtifactSession: Send + Sync {
    /// Rows with a non-blank storage path whose URL expires strictly before
    /// `cutoff`. Rows without an expiry are not returned.
    async fn find_expiring(&self, cutoff: DateTime<Utc>) -> Result<Vec<Artifact>, StoreError>;

    /// Sets both the access URL and its expiry of one row.
    ///
    /// Both columns change together or not at all. Re-applying the same values
    /// is a no-op in effect.
    async fn update_url(
        &self,
        id: &ArtifactId,
        access_url: &str,
        url_expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
