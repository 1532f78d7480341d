use crate::artifact_store::{ArtifactFamily, ArtifactId, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a single artifact was not refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The provider errored or returned an unusable URL.
    RefreshFailed,
    /// The owning row disappeared between scan and write.
    NotFound,
    /// The write could not reach the store.
    StoreUnavailable,
    /// Still in flight when the run deadline passed.
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::RefreshFailed => "refresh_failed",
            FailureReason::NotFound => "not_found",
            FailureReason::StoreUnavailable => "store_unavailable",
            FailureReason::Timeout => "timeout",
        }
    }
}

impl From<&StoreError> for FailureReason {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => FailureReason::NotFound,
            StoreError::Unavailable(_) => FailureReason::StoreUnavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFailure {
    pub id: ArtifactId,
    pub reason: FailureReason,
    pub detail: String,
}

/// Externally observable result of one refresh run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub family: ArtifactFamily,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scanned: usize,
    pub succeeded: usize,
    pub failed: Vec<ArtifactFailure>,
    /// Scanned but never started because of the deadline or shutdown. The next
    /// run's scan picks them up again.
    pub deferred: usize,
    pub timed_out: bool,
}

impl RunSummary {
    pub fn empty(family: ArtifactFamily, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        Self {
            family,
            started_at,
            finished_at,
            scanned: 0,
            succeeded: 0,
            failed: Vec::new(),
            deferred: 0,
            timed_out: false,
        }
    }

    /// Artifacts whose refresh was started, successful or not.
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    pub fn failed_count(&self, reason: FailureReason) -> usize {
        self.failed.iter().filter(|f| f.reason == reason).count()
    }

    /// True when every attempted artifact failed to reach the store on write.
    pub fn systemic_store_failure(&self) -> bool {
        let attempted = self.attempted();
        attempted > 0 && self.failed_count(FailureReason::StoreUnavailable) == attempted
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.deferred == 0
    }
}
