//! Interval job running one family's URL refresh coordinator.

use crate::artifact_store::ArtifactFamily;
use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::url_refresh::{RefreshCoordinator, RunError};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct UrlRefreshJob {
    coordinator: Arc<RefreshCoordinator>,
    interval: Duration,
}

impl UrlRefreshJob {
    pub fn new(coordinator: Arc<RefreshCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    pub fn family(&self) -> ArtifactFamily {
        self.coordinator.family()
    }
}

#[async_trait]
impl BackgroundJob for UrlRefreshJob {
    fn id(&self) -> &'static str {
        self.family().job_id()
    }

    fn name(&self) -> &'static str {
        match self.family() {
            ArtifactFamily::AudioRecords => "Audio Record URL Refresh",
            ArtifactFamily::FlashcardQuestions => "Flashcard Question URL Refresh",
            ArtifactFamily::Chunks => "Chunk Audio URL Refresh",
        }
    }

    fn description(&self) -> &'static str {
        match self.family() {
            ArtifactFamily::AudioRecords => {
                "Re-signs audio record URLs that expire within the lookahead window"
            }
            ArtifactFamily::FlashcardQuestions => {
                "Re-signs flashcard question audio URLs that expire within the lookahead window"
            }
            ArtifactFamily::Chunks => {
                "Re-signs chunk audio URLs that expire within the lookahead window"
            }
        }
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<Option<JsonValue>, JobError> {
        let summary = match self.coordinator.run_until(&ctx.cancellation_token).await {
            Ok(summary) => summary,
            Err(RunError::AlreadyRunning(_)) => return Err(JobError::AlreadyRunning),
            Err(err @ RunError::StoreUnavailable(_)) => {
                return Err(JobError::ExecutionFailed(err.to_string()))
            }
        };

        let details = serde_json::to_value(&summary)
            .map_err(|e| JobError::ExecutionFailed(format!("Failed to serialize summary: {}", e)))?;

        if summary.systemic_store_failure() {
            return Err(JobError::FailedWithDetails {
                message: format!(
                    "store unavailable for all {} attempted {} artifacts",
                    summary.attempted(),
                    summary.family
                ),
                details,
            });
        }

        if !summary.failed.is_empty() {
            warn!(
                "{} of {} {} artifacts were not refreshed",
                summary.failed.len(),
                summary.scanned,
                summary.family
            );
        }

        Ok(Some(details))
    }
}
