//! Signed-URL lifecycle manager for audio artifacts.
//!
//! Periodically finds artifacts (audio records, flashcard questions, chunks)
//! whose signed access URL is about to expire, mints a fresh URL from the
//! storage provider and records it, one failure never blocking the rest of
//! the batch.

pub mod admin;
pub mod artifact_store;
pub mod background_jobs;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod server_store;
pub mod sqlite_persistence;
pub mod url_refresh;
pub mod url_signer;

// Re-export commonly used types for convenience
pub use artifact_store::{
    Artifact, ArtifactFamily, ArtifactId, ArtifactStore, ConnectionPool, SqliteArtifactStore,
    StoreError,
};
pub use server_store::{ServerStore, SqliteServerStore};
pub use url_refresh::{RefreshCoordinator, RunError, RunSummary};
pub use url_signer::{SignedUrlProvider, SignerError};
