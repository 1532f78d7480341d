use super::context::JobContext;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior};
use crate::metrics;
use crate::server_store::{JobRunStatus, JobScheduleState, ServerStore};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how long the scheduler sleeps between checks.
const MAX_IDLE: Duration = Duration::from_secs(60);

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Currently running jobs with their task handles (managed by scheduler loop)
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Server store for persisting job history.
    server_store: Arc<dyn ServerStore>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,

    /// How long shutdown waits for each running job.
    shutdown_timeout: Duration,
}

impl JobScheduler {
    pub fn new(
        server_store: Arc<dyn ServerStore>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            server_store,
            command_receiver,
            shutdown_token,
            job_context,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Register a job with the scheduler.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop. Returns after the shutdown token fires.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        self.mark_stale_runs();

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Fails runs left `running` by a previous process.
    fn mark_stale_runs(&self) {
        match self.server_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    /// Manually trigger a job by ID.
    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        self.check_can_start(job_id).await?;
        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    async fn check_can_start(&self, job_id: &str) -> Result<(), JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        Ok(())
    }

    /// Calculate time until the next scheduled job should run.
    async fn time_until_next_scheduled_job(&self) -> Duration {
        let mut min_duration = MAX_IDLE;
        let now = Utc::now();

        let state = self.shared_state.read().await;
        for (job_id, job) in &state.jobs {
            if state.running_jobs.contains(job_id) {
                continue;
            }

            if let Some(next_run) = self.get_next_run_time(job_id, &job.schedule(), now) {
                if next_run > now {
                    let duration = (next_run - now).to_std().unwrap_or(Duration::from_secs(1));
                    min_duration = min_duration.min(duration);
                } else {
                    return Duration::ZERO;
                }
            }
        }

        min_duration
    }

    /// Get the next scheduled run time for a job, relative to `now`.
    fn get_next_run_time(
        &self,
        job_id: &str,
        schedule: &JobSchedule,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match schedule {
            JobSchedule::Interval(_) => match self.server_store.get_schedule_state(job_id) {
                Ok(Some(state)) => Some(state.next_run_at),
                // No schedule state yet: first run is due at `now`
                Ok(None) => Some(now),
                Err(e) => {
                    warn!("Failed to read schedule state for {}: {}", job_id, e);
                    Some(now + chrono::Duration::seconds(MAX_IDLE.as_secs() as i64))
                }
            },
            JobSchedule::Manual => None,
        }
    }

    /// Run all jobs that are due for scheduled execution.
    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let mut jobs_to_run = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    continue;
                }

                if let Some(next_run) = self.get_next_run_time(job_id, &job.schedule(), now) {
                    if next_run <= now {
                        jobs_to_run.push(job_id.clone());
                    }
                }
            }
        }

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    /// Records the run start, marks the job running and builds its context.
    async fn begin_run(
        &mut self,
        job_id: &str,
        triggered_by: &str,
    ) -> Option<(Arc<dyn BackgroundJob>, i64, JobContext)> {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to start unknown job: {}", job_id);
                    return None;
                }
            }
        };

        let run_id = match self.server_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                return None;
            }
        };

        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job_id.to_string());
        }

        // Push next_run_at forward now so the loop does not respawn the job
        // while it is still running.
        if let JobSchedule::Interval(interval) = job.schedule() {
            let last_run_at = self
                .server_store
                .get_schedule_state(job_id)
                .ok()
                .flatten()
                .and_then(|s| s.last_run_at);
            let schedule_state = JobScheduleState {
                job_id: job_id.to_string(),
                next_run_at: next_run_after(Utc::now(), interval),
                last_run_at,
            };
            if let Err(e) = self.server_store.update_schedule_state(&schedule_state) {
                warn!("Failed to initialize schedule state for {}: {}", job_id, e);
            }
        }

        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        Some((job, run_id, ctx))
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let Some((job, run_id, ctx)) = self.begin_run(job_id, triggered_by).await else {
            return;
        };

        let server_store = Arc::clone(&self.server_store);
        let shared_state = Arc::clone(&self.shared_state);
        let handle = tokio::spawn(async move {
            let _ = execute_and_record(job, ctx, run_id, server_store, shared_state).await;
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Runs a job on the current task and waits for it, recording history the
    /// same way scheduled runs do. Used when the scheduler loop is not running.
    pub async fn run_job_now(
        &mut self,
        job_id: &str,
        triggered_by: &str,
    ) -> Result<Option<JsonValue>, JobError> {
        self.check_can_start(job_id).await?;
        let (job, run_id, ctx) = self.begin_run(job_id, triggered_by).await.ok_or_else(|| {
            JobError::ExecutionFailed(format!("Could not start job {}", job_id))
        })?;

        let result = execute_and_record(
            job,
            ctx,
            run_id,
            Arc::clone(&self.server_store),
            Arc::clone(&self.shared_state),
        )
        .await;
        self.job_cancel_tokens.remove(job_id);
        result
    }

    /// Clean up handles for completed jobs.
    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(&job_id);
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let behaviors: HashMap<String, ShutdownBehavior> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .iter()
                .map(|(id, job)| (id.clone(), job.shutdown_behavior()))
                .collect()
        };

        for (job_id, token) in &self.job_cancel_tokens {
            let behavior = behaviors
                .get(job_id)
                .copied()
                .unwrap_or(ShutdownBehavior::Cancellable);
            if behavior == ShutdownBehavior::Cancellable {
                debug!("Cancelling job: {}", job_id);
                token.cancel();
            }
        }

        for (job_id, handle) in self.running_handles.drain() {
            if behaviors.get(&job_id) == Some(&ShutdownBehavior::WaitForCompletion) {
                info!("Waiting for job {} to complete...", job_id);
            }
            if tokio::time::timeout(self.shutdown_timeout, handle)
                .await
                .is_err()
            {
                warn!(
                    "Job {} did not finish within {:?} of shutdown",
                    job_id, self.shutdown_timeout
                );
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

fn next_run_after(from: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    from + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::days(1))
}

/// Executes one run and persists its outcome.
async fn execute_and_record(
    job: Arc<dyn BackgroundJob>,
    ctx: JobContext,
    run_id: i64,
    server_store: Arc<dyn ServerStore>,
    shared_state: Arc<RwLock<SharedJobState>>,
) -> Result<Option<JsonValue>, JobError> {
    let job_id = job.id();
    let start_time = Instant::now();
    let task_job = Arc::clone(&job);
    let result = tokio::spawn(async move { task_job.execute(&ctx).await }).await;
    let elapsed = start_time.elapsed();

    let (status, error_msg, status_label, outcome) = match result {
        Ok(Ok(details)) => {
            info!("Job {} completed successfully in {:?}", job_id, elapsed);
            (JobRunStatus::Completed, None, "success", Ok(details))
        }
        Ok(Err(JobError::Cancelled)) => {
            info!("Job {} was cancelled after {:?}", job_id, elapsed);
            (
                JobRunStatus::Failed,
                Some("Cancelled".to_string()),
                "cancelled",
                Err(JobError::Cancelled),
            )
        }
        Ok(Err(e)) => {
            error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
            (JobRunStatus::Failed, Some(e.to_string()), "failed", Err(e))
        }
        Err(e) => {
            error!("Job {} panicked after {:?}: {}", job_id, elapsed, e);
            let msg = format!("Task panic: {}", e);
            (
                JobRunStatus::Failed,
                Some(msg.clone()),
                "panic",
                Err(JobError::ExecutionFailed(msg)),
            )
        }
    };

    metrics::record_background_job_execution(job_id, status_label, elapsed);
    metrics::set_background_job_running(job_id, false);

    let details = match &outcome {
        Ok(details) => details.as_ref(),
        Err(e) => e.details(),
    };
    if let Err(e) = server_store.record_job_finish(run_id, status, error_msg, details) {
        error!("Failed to record job finish for {}: {}", job_id, e);
    }

    if let JobSchedule::Interval(interval) = job.schedule() {
        let now = Utc::now();
        let state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at: next_run_after(now, interval),
            last_run_at: Some(now),
        };
        if let Err(e) = server_store.update_schedule_state(&state) {
            error!("Failed to update schedule state for {}: {}", job_id, e);
        }
    }

    {
        let mut state = shared_state.write().await;
        state.running_jobs.remove(job_id);
    }

    outcome
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    server_store: Arc<dyn ServerStore>,
    shutdown_token: CancellationToken,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState {
        jobs: HashMap::new(),
        running_jobs: HashSet::new(),
    }));

    let job_context = JobContext::new(shutdown_token.child_token(), Arc::clone(&server_store));
    let scheduler = JobScheduler::new(
        Arc::clone(&server_store),
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );

    let handle = SchedulerHandle::new(command_tx, shared_state, server_store);

    (scheduler, handle)
}
