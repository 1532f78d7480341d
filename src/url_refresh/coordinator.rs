use super::refresher::UrlRefresher;
use super::scanner::ExpiryScanner;
use super::summary::{ArtifactFailure, FailureReason, RunSummary};
use super::RunError;
use crate::artifact_store::{Artifact, ArtifactFamily, ArtifactId, ArtifactSession, ArtifactStore};
use crate::clock::Clock;
use crate::metrics;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Limits applied to every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Artifacts refreshed at the same time.
    pub max_concurrency: usize,
    /// Soft deadline for a whole run.
    pub run_timeout: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            run_timeout: Duration::from_secs(30 * 60),
        }
    }
}

enum Outcome {
    Succeeded,
    Failed(ArtifactFailure),
    Deferred { by_deadline: bool },
}

/// Drives refresh runs for one artifact family.
///
/// A run goes `Scanning -> Refreshing -> Done`, or ends in `Failed` when the
/// store cannot be reached before any artifact is touched. Only one run is in
/// flight per coordinator; a trigger arriving meanwhile is skipped.
pub struct RefreshCoordinator {
    store: Arc<dyn ArtifactStore>,
    scanner: ExpiryScanner,
    refresher: UrlRefresher,
    clock: Arc<dyn Clock>,
    limits: RunLimits,
    running: Mutex<()>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        scanner: ExpiryScanner,
        refresher: UrlRefresher,
        clock: Arc<dyn Clock>,
        limits: RunLimits,
    ) -> Self {
        Self {
            store,
            scanner,
            refresher,
            clock,
            limits: RunLimits {
                max_concurrency: limits.max_concurrency.max(1),
                run_timeout: limits.run_timeout,
            },
            running: Mutex::new(()),
        }
    }

    pub fn family(&self) -> ArtifactFamily {
        self.store.family()
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Runs one refresh batch to completion or to the soft deadline.
    pub async fn run_once(&self) -> Result<RunSummary, RunError> {
        self.run_until(&CancellationToken::new()).await
    }

    /// Like [`run_once`](Self::run_once), but artifacts not yet started when
    /// `cancel` fires are deferred to the next run.
    pub async fn run_until(&self, cancel: &CancellationToken) -> Result<RunSummary, RunError> {
        let family = self.family();
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| RunError::AlreadyRunning(family))?;

        let started = Instant::now();
        let result = self.run_locked(cancel, started).await;

        let status = if result.is_ok() { "done" } else { "failed" };
        metrics::record_refresh_run(family.as_str(), status, started.elapsed());
        match &result {
            Ok(summary) => log_summary(summary),
            Err(err) => error!("URL refresh run for {} failed: {}", family, err),
        }
        result
    }

    async fn run_locked(
        &self,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<RunSummary, RunError> {
        let family = self.family();
        let started_at = self.clock.now();
        let deadline = started + self.limits.run_timeout;

        // Dropping the session on any return below releases the connection.
        let session = self.store.acquire().await.map_err(RunError::StoreUnavailable)?;
        let artifacts = self
            .scanner
            .find_expiring(session.as_ref())
            .await
            .map_err(RunError::StoreUnavailable)?;

        let scanned = artifacts.len();
        if scanned == 0 {
            debug!("No {} artifacts expiring within {}", family, self.scanner.lookahead());
            return Ok(RunSummary::empty(family, started_at, self.clock.now()));
        }
        info!("Refreshing URLs of {} expiring {} artifacts", scanned, family);

        let session_ref: &dyn ArtifactSession = session.as_ref();
        let outcomes: Vec<Outcome> = stream::iter(artifacts)
            .map(|artifact| self.process(session_ref, artifact, deadline, cancel))
            .buffer_unordered(self.limits.max_concurrency)
            .collect()
            .await;
        drop(session);

        let mut summary = RunSummary::empty(family, started_at, started_at);
        summary.scanned = scanned;
        for outcome in outcomes {
            match outcome {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::Failed(failure) => {
                    if failure.reason == FailureReason::Timeout {
                        summary.timed_out = true;
                    }
                    summary.failed.push(failure);
                }
                Outcome::Deferred { by_deadline } => {
                    summary.deferred += 1;
                    summary.timed_out |= by_deadline;
                }
            }
        }
        summary.finished_at = self.clock.now();
        record_outcomes(&summary);
        Ok(summary)
    }

    async fn process(
        &self,
        session: &dyn ArtifactSession,
        artifact: Artifact,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Deferred { by_deadline: false };
        }
        if Instant::now() >= deadline {
            return Outcome::Deferred { by_deadline: true };
        }

        let id = artifact.id.clone();
        match tokio::time::timeout_at(deadline, self.refresh_one(session, &artifact)).await {
            Ok(Ok(())) => {
                debug!("Refreshed URL of {} artifact {}", artifact.family, id);
                Outcome::Succeeded
            }
            Ok(Err(failure)) => {
                warn!(
                    "Failed to refresh {} artifact {} ({}): {}",
                    artifact.family,
                    id,
                    failure.reason.as_str(),
                    failure.detail
                );
                Outcome::Failed(failure)
            }
            Err(_) => {
                warn!(
                    "Refresh of {} artifact {} still in flight at run deadline",
                    artifact.family, id
                );
                Outcome::Failed(ArtifactFailure {
                    id,
                    reason: FailureReason::Timeout,
                    detail: format!(
                        "run deadline of {:?} reached",
                        self.limits.run_timeout
                    ),
                })
            }
        }
    }

    async fn refresh_one(
        &self,
        session: &dyn ArtifactSession,
        artifact: &Artifact,
    ) -> Result<(), ArtifactFailure> {
        let failure = |id: &ArtifactId, reason, detail: String| ArtifactFailure {
            id: id.clone(),
            reason,
            detail,
        };

        let refreshed = self
            .refresher
            .refresh(artifact)
            .await
            .map_err(|e| failure(&artifact.id, FailureReason::RefreshFailed, e.to_string()))?;

        session
            .update_url(&artifact.id, &refreshed.access_url, refreshed.url_expires_at)
            .await
            .map_err(|e| failure(&artifact.id, FailureReason::from(&e), e.to_string()))
    }
}

fn record_outcomes(summary: &RunSummary) {
    let family = summary.family.as_str();
    metrics::record_artifact_outcomes(family, "succeeded", summary.succeeded);
    metrics::record_artifact_outcomes(family, "deferred", summary.deferred);
    for reason in [
        FailureReason::RefreshFailed,
        FailureReason::NotFound,
        FailureReason::StoreUnavailable,
        FailureReason::Timeout,
    ] {
        metrics::record_artifact_outcomes(family, reason.as_str(), summary.failed_count(reason));
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        family = %summary.family,
        scanned = summary.scanned,
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        deferred = summary.deferred,
        timed_out = summary.timed_out,
        "URL refresh run finished"
    );
    if summary.systemic_store_failure() {
        error!(
            "Every attempted {} artifact failed to reach the store ({} writes)",
            summary.family,
            summary.attempted()
        );
    }
}
