use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all refresher metrics
const PREFIX: &str = "url_refresher";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Refresh run metrics
    pub static ref REFRESH_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_refresh_runs_total"), "Total refresh runs by family and status"),
        &["family", "status"]
    ).expect("Failed to create refresh_runs_total metric");

    pub static ref REFRESH_RUN_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_refresh_run_duration_seconds"),
            "Refresh run duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0]),
        &["family"]
    ).expect("Failed to create refresh_run_duration_seconds metric");

    pub static ref REFRESH_ARTIFACTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_refresh_artifacts_total"),
            "Artifacts processed by refresh runs, by outcome"
        ),
        &["family", "outcome"]
    ).expect("Failed to create refresh_artifacts_total metric");

    // Background job metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_background_job_executions_total"),
            "Total background job executions"
        ),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job execution duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 1800.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(
            format!("{PREFIX}_background_job_running"),
            "Whether a background job is currently running (1) or not (0)"
        ),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(REFRESH_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REFRESH_RUN_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(REFRESH_ARTIFACTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));

    tracing::info!("Metrics system initialized");
}

/// Record the end of one refresh run. `status` is `done` or `failed`.
pub fn record_refresh_run(family: &str, status: &str, duration: Duration) {
    REFRESH_RUNS_TOTAL.with_label_values(&[family, status]).inc();
    REFRESH_RUN_DURATION_SECONDS
        .with_label_values(&[family])
        .observe(duration.as_secs_f64());
}

/// Add `count` artifacts with the given outcome
pub fn record_artifact_outcomes(family: &str, outcome: &str, count: usize) {
    if count == 0 {
        return;
    }
    REFRESH_ARTIFACTS_TOTAL
        .with_label_values(&[family, outcome])
        .inc_by(count as f64);
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_metric(name: &str) -> Option<prometheus::proto::MetricFamily> {
        REGISTRY
            .gather()
            .into_iter()
            .find(|m| m.get_name() == name)
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        init_metrics();
        assert!(!REGISTRY.gather().is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_record_refresh_run() {
        init_metrics();
        record_refresh_run("chunks", "done", Duration::from_millis(120));
        assert!(find_metric("url_refresher_refresh_runs_total").is_some());
        assert!(find_metric("url_refresher_refresh_run_duration_seconds").is_some());
    }

    #[test]
    fn test_record_artifact_outcomes() {
        init_metrics();
        record_artifact_outcomes("audio_records", "succeeded", 3);
        let before = REFRESH_ARTIFACTS_TOTAL
            .with_label_values(&["audio_records", "refresh_failed"])
            .get();
        record_artifact_outcomes("audio_records", "refresh_failed", 2);
        record_artifact_outcomes("audio_records", "refresh_failed", 0);
        let after = REFRESH_ARTIFACTS_TOTAL
            .with_label_values(&["audio_records", "refresh_failed"])
            .get();
        assert_eq!(after - before, 2.0);
    }

    #[test]
    fn test_background_job_running_gauge() {
        init_metrics();
        set_background_job_running("metrics_test_job", true);
        assert_eq!(
            BACKGROUND_JOB_RUNNING
                .with_label_values(&["metrics_test_job"])
                .get(),
            1.0
        );
        set_background_job_running("metrics_test_job", false);
        assert_eq!(
            BACKGROUND_JOB_RUNNING
                .with_label_values(&["metrics_test_job"])
                .get(),
            0.0
        );
    }
}
