//! Refresh jobs driven through the scheduler and the admin API.

mod common;

use audio_url_refresher::admin::make_admin_router;
use audio_url_refresher::artifact_store::ArtifactFamily;
use audio_url_refresher::background_jobs::{
    create_scheduler, jobs::UrlRefreshJob, JobError, JobScheduler, SchedulerHandle,
};
use audio_url_refresher::server_store::{ServerStore, SqliteServerStore};
use audio_url_refresher::url_signer::SignerError;
use chrono::Duration as ChronoDuration;
use common::{now, ScriptedSigner, TestArtifactDb};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct Harness {
    db: TestArtifactDb,
    signer: Arc<ScriptedSigner>,
    scheduler: JobScheduler,
    handle: SchedulerHandle,
    shutdown: CancellationToken,
    _server_dir: TempDir,
}

async fn harness(families: &[ArtifactFamily], interval: Duration) -> Harness {
    let db = TestArtifactDb::create();
    let signer = ScriptedSigner::new();
    let server_dir = TempDir::new().unwrap();
    let server_store: Arc<dyn ServerStore> =
        Arc::new(SqliteServerStore::new(server_dir.path().join("server.db")).unwrap());
    let shutdown = CancellationToken::new();
    let (mut scheduler, handle) = create_scheduler(server_store, shutdown.clone());

    for family in families {
        let coordinator = db.coordinator(*family, signer.clone());
        scheduler
            .register_job(Arc::new(UrlRefreshJob::new(Arc::new(coordinator), interval)))
            .await;
    }

    Harness {
        db,
        signer,
        scheduler,
        handle,
        shutdown,
        _server_dir: server_dir,
    }
}

async fn wait_for_finished_runs(handle: &SchedulerHandle, job_id: &str, count: usize) {
    for _ in 0..200 {
        let history = handle.get_job_history(job_id, 10).unwrap();
        if history.iter().filter(|r| r.finished_at.is_some()).count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{} did not finish {} runs", job_id, count);
}

#[tokio::test]
async fn test_run_job_now_stores_summary_in_history() {
    let mut h = harness(&[ArtifactFamily::AudioRecords], Duration::from_secs(3600)).await;
    h.db.seed(
        ArtifactFamily::AudioRecords,
        "A",
        Some("audio/a.mp3"),
        Some(now() + ChronoDuration::days(1)),
    );

    let details = h
        .scheduler
        .run_job_now("url_refresh_audio_records", "run_once")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details["scanned"], 1);
    assert_eq!(details["succeeded"], 1);

    let history = h.handle.get_job_history("url_refresh_audio_records", 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "completed");
    assert_eq!(history[0].triggered_by, "run_once");
    assert_eq!(history[0].details.as_ref().unwrap()["succeeded"], 1);
}

#[tokio::test]
async fn test_scan_failure_marks_job_run_failed() {
    let mut h = harness(&[ArtifactFamily::Chunks], Duration::from_secs(3600)).await;
    h.db.seed(ArtifactFamily::Chunks, "c1", Some("chunks/c1.mp3"), Some(now()));
    h.db.raw_connection()
        .execute("DROP TABLE chunks", [])
        .unwrap();

    let result = h.scheduler.run_job_now("url_refresh_chunks", "run_once").await;
    assert!(matches!(result, Err(JobError::ExecutionFailed(_))));

    let history = h.handle.get_job_history("url_refresh_chunks", 10).unwrap();
    assert_eq!(history[0].status, "failed");
    assert!(history[0]
        .error_message
        .as_ref()
        .unwrap()
        .contains("scan aborted"));
}

#[tokio::test]
async fn test_per_artifact_failures_keep_job_run_completed() {
    let mut h = harness(&[ArtifactFamily::FlashcardQuestions], Duration::from_secs(3600)).await;
    let family = ArtifactFamily::FlashcardQuestions;
    h.db.seed(family, "q1", Some("flashcards/q1.mp3"), Some(now()));
    h.db.seed(family, "q2", Some("flashcards/q2.mp3"), Some(now()));
    h.signer.fail(
        "flashcards/q2.mp3",
        SignerError::ObjectNotFound("flashcards/q2.mp3".to_string()),
    );

    let details = h
        .scheduler
        .run_job_now("url_refresh_flashcard_questions", "run_once")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(details["succeeded"], 1);
    let failed = details["failed"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["id"], "q2");
    assert_eq!(failed[0]["reason"], "refresh_failed");
}

#[tokio::test]
async fn test_scheduler_runs_every_family_on_startup() {
    let families = ArtifactFamily::ALL;
    let h = harness(&families, Duration::from_secs(3600)).await;
    for family in families {
        h.db.seed(family, "due", Some(format!("{}/due.mp3", family).as_str()), Some(now()));
    }

    let Harness {
        db,
        signer,
        mut scheduler,
        handle,
        shutdown,
        _server_dir,
    } = h;
    let task = tokio::spawn(async move { scheduler.run().await });

    for family in families {
        wait_for_finished_runs(&handle, family.job_id(), 1).await;
        let due = db.get(family, "due").await.unwrap();
        assert_eq!(
            due.access_url.as_deref(),
            Some(ScriptedSigner::fresh_url(&format!("{}/due.mp3", family)).as_str())
        );
    }
    assert_eq!(signer.calls().len(), 3);

    let jobs = handle.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 3);
    for job in &jobs {
        assert_eq!(job.schedule.value_secs, Some(3600));
        assert!(job.next_run_at.is_some());
    }

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
}

#[tokio::test]
async fn test_admin_api_triggers_refresh() {
    let h = harness(&[ArtifactFamily::Chunks], Duration::from_secs(3600)).await;
    let Harness {
        db,
        mut scheduler,
        handle,
        shutdown,
        _server_dir,
        ..
    } = h;

    // Let the startup run pass with nothing to do, then seed and trigger.
    let task = tokio::spawn(async move { scheduler.run().await });
    wait_for_finished_runs(&handle, "url_refresh_chunks", 1).await;
    db.seed(ArtifactFamily::Chunks, "late", Some("chunks/late.mp3"), Some(now()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = make_admin_router(handle.clone());
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
            .unwrap();
    });

    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let response = client
        .post(format!("{}/jobs/url_refresh_chunks/trigger", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    wait_for_finished_runs(&handle, "url_refresh_chunks", 2).await;

    let late = db.get(ArtifactFamily::Chunks, "late").await.unwrap();
    assert_eq!(
        late.access_url.as_deref(),
        Some(ScriptedSigner::fresh_url("chunks/late.mp3").as_str())
    );

    let history: JsonValue = client
        .get(format!("{}/jobs/url_refresh_chunks/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let runs = history.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["triggered_by"], "manual");
    assert_eq!(runs[0]["details"]["succeeded"], 1);
    assert_eq!(runs[1]["triggered_by"], "schedule");

    let missing = client
        .post(format!("{}/jobs/url_refresh_podcasts/trigger", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let metrics = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
}
