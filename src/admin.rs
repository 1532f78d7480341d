//! Admin HTTP surface served on the metrics port.

use crate::background_jobs::{JobError, SchedulerHandle};
use crate::metrics::metrics_handler;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// GET /jobs - List all registered jobs
async fn list_jobs(State(scheduler): State<SchedulerHandle>) -> Response {
    match scheduler.list_jobs().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => {
            warn!("Failed to list jobs: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list jobs")
        }
    }
}

/// GET /jobs/{id}
async fn get_job(State(scheduler): State<SchedulerHandle>, Path(job_id): Path<String>) -> Response {
    match scheduler.get_job(&job_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Job {} not found", job_id)),
        Err(e) => {
            warn!("Failed to get job {}: {}", job_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get job")
        }
    }
}

/// GET /jobs/{id}/history?limit=N
async fn get_job_history(
    State(scheduler): State<SchedulerHandle>,
    Path(job_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    if !scheduler.job_exists(&job_id).await {
        return error_response(StatusCode::NOT_FOUND, format!("Job {} not found", job_id));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    match scheduler.get_job_history(&job_id, limit) {
        Ok(history) => Json(history).into_response(),
        Err(e) => {
            warn!("Failed to get history for job {}: {}", job_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get job history")
        }
    }
}

/// POST /jobs/{id}/trigger
async fn trigger_job(
    State(scheduler): State<SchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    match scheduler.trigger_job(&job_id).await {
        Ok(()) => {
            info!("Job {} triggered through admin API", job_id);
            StatusCode::ACCEPTED.into_response()
        }
        Err(JobError::NotFound) => {
            error_response(StatusCode::NOT_FOUND, format!("Job {} not found", job_id))
        }
        Err(JobError::AlreadyRunning) => error_response(
            StatusCode::CONFLICT,
            format!("Job {} is already running", job_id),
        ),
        Err(e) => {
            warn!("Failed to trigger job {}: {}", job_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub fn make_admin_router(scheduler: SchedulerHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/history", get(get_job_history))
        .route("/jobs/{id}/trigger", post(trigger_job))
        .with_state(scheduler)
}

/// Serves the admin router until `shutdown` fires.
pub async fn run_admin_server(
    scheduler: SchedulerHandle,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind admin server to port {}", port))?;
    info!("Metrics and admin API available at port {}", port);

    axum::serve(listener, make_admin_router(scheduler))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Admin server failed")
}
