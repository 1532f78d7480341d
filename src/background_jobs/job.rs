use super::context::JobContext;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Schedule for when a job should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSchedule {
    /// Run at fixed intervals, starting as soon as the scheduler starts
    Interval(Duration),
    /// Run only when triggered through the admin API
    Manual,
}

/// How a job should be handled during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

/// Errors that can occur during job execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Job not found")]
    NotFound,
    #[error("Job is already running")]
    AlreadyRunning,
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    /// The job failed but produced details that belong in its run history.
    #[error("Execution failed: {message}")]
    FailedWithDetails { message: String, details: JsonValue },
    #[error("Job was cancelled")]
    Cancelled,
}

impl JobError {
    /// Details the failed run should still be recorded with.
    pub fn details(&self) -> Option<&JsonValue> {
        match self {
            JobError::FailedWithDetails { details, .. } => Some(details),
            _ => None,
        }
    }
}

/// Trait for background jobs.
///
/// Long-running work should watch `ctx.cancellation_token` and stop early when
/// it fires.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// When this job should be scheduled to run.
    fn schedule(&self) -> JobSchedule;

    /// How this job should be handled during shutdown.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Execute the job. The returned JSON, if any, is stored with the run.
    async fn execute(&self, ctx: &JobContext) -> Result<Option<JsonValue>, JobError>;
}
