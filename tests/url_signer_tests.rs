//! Signed-URL providers exercised over real HTTP and through full refresh runs.

mod common;

use audio_url_refresher::artifact_store::ArtifactFamily;
use audio_url_refresher::clock::Clock;
use audio_url_refresher::config::{SignerConfig, SignerKind};
use audio_url_refresher::url_refresh::FailureReason;
use audio_url_refresher::url_signer::{
    build_signer, SignedUrlProvider, SignerError, StorageApiSigner,
};
use common::{now, MockStorageApi, TestArtifactDb, STORAGE_API_KEY, STORAGE_BUCKET, VALIDITY};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn api_signer(server: &MockStorageApi, api_key: &str) -> StorageApiSigner {
    StorageApiSigner::new(
        &server.endpoint,
        STORAGE_BUCKET,
        api_key,
        Duration::from_secs(5),
    )
    .unwrap()
}

// ============================================================================
// Storage API signer
// ============================================================================

#[tokio::test]
async fn test_storage_api_signer_mints_absolute_url() {
    let server = MockStorageApi::spawn().await;
    let signer = api_signer(&server, STORAGE_API_KEY);

    let url = signer
        .mint_url("/words/hello.mp3", Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(
        url,
        format!(
            "{}/object/sign/audio/words/hello.mp3?token=tok-3600",
            server.endpoint
        )
    );
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].bucket, "audio");
    assert_eq!(requests[0].path, "words/hello.mp3");
    assert_eq!(requests[0].expires_in, 3600);
}

#[tokio::test]
async fn test_storage_api_signer_encodes_path_segments() {
    let server = MockStorageApi::spawn().await;
    let signer = api_signer(&server, STORAGE_API_KEY);

    signer
        .mint_url("chunks/ça va.mp3", Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(server.requests()[0].path, "chunks/ça va.mp3");
}

#[tokio::test]
async fn test_storage_api_signer_classifies_failures() {
    let server = MockStorageApi::spawn().await;
    server.mark_missing("words/missing.mp3");
    server.mark_broken("words/broken.mp3");

    let signer = api_signer(&server, STORAGE_API_KEY);
    let missing = signer
        .mint_url("words/missing.mp3", Duration::from_secs(60))
        .await;
    assert_eq!(
        missing,
        Err(SignerError::ObjectNotFound("words/missing.mp3".to_string()))
    );

    let broken = signer
        .mint_url("words/broken.mp3", Duration::from_secs(60))
        .await;
    assert!(matches!(broken, Err(SignerError::InvalidResponse(_))));

    let wrong_key = api_signer(&server, "not-the-key");
    let denied = wrong_key
        .mint_url("words/hello.mp3", Duration::from_secs(60))
        .await;
    assert!(matches!(denied, Err(SignerError::PermissionDenied(body)) if body.contains("invalid signature")));
}

#[tokio::test]
async fn test_storage_api_signer_reports_transport_errors() {
    // Nothing listens on the discard port.
    let signer = StorageApiSigner::new(
        "http://127.0.0.1:9/storage/v1",
        STORAGE_BUCKET,
        STORAGE_API_KEY,
        Duration::from_secs(2),
    )
    .unwrap();

    let result = signer.mint_url("words/a.mp3", Duration::from_secs(60)).await;
    assert!(matches!(result, Err(SignerError::Transport(_))));
}

#[tokio::test]
async fn test_refresh_run_through_storage_api() {
    let server = MockStorageApi::spawn().await;
    server.mark_missing("audio/deleted.mp3");
    let db = TestArtifactDb::create();
    let family = ArtifactFamily::AudioRecords;
    db.seed(family, "ok", Some("audio/ok.mp3"), Some(now()));
    db.seed(family, "deleted", Some("audio/deleted.mp3"), Some(now()));

    let signer: Arc<dyn SignedUrlProvider> = Arc::new(api_signer(&server, STORAGE_API_KEY));
    let summary = db.coordinator(family, signer).run_once().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].reason, FailureReason::RefreshFailed);
    assert!(summary.failed[0].detail.contains("audio/deleted.mp3"));

    let ok = db.get(family, "ok").await.unwrap();
    let url = ok.access_url.unwrap();
    assert!(url.starts_with(&server.endpoint));
    assert!(url.ends_with(&format!("token=tok-{}", VALIDITY.as_secs())));
}

// ============================================================================
// HMAC signer
// ============================================================================

#[tokio::test]
async fn test_hmac_signer_built_from_config_round_trips_with_verify() {
    let db = TestArtifactDb::create();
    let clock: Arc<dyn Clock> = db.clock.clone();
    let config = SignerConfig {
        kind: SignerKind::Hmac {
            base_url: "https://media.example.com/files/".to_string(),
            secret: "integration-secret".to_string(),
        },
        request_timeout_secs: 5,
    };
    let signer = build_signer(&config, clock.clone()).unwrap();

    let family = ArtifactFamily::Chunks;
    db.seed(family, "c1", Some("chunks/c1.mp3"), Some(now()));
    let summary = db.coordinator(family, signer).run_once().await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let stored = db.get(family, "c1").await.unwrap();
    let url = Url::parse(stored.access_url.as_deref().unwrap()).unwrap();
    assert_eq!(url.host_str(), Some("media.example.com"));
    assert_eq!(url.path(), "/files/chunks/c1.mp3");

    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let expires: i64 = query["expires"].parse().unwrap();
    assert_eq!(expires, stored.url_expires_at.unwrap().timestamp());

    let verifier = audio_url_refresher::url_signer::HmacUrlSigner::new(
        "https://media.example.com/files",
        b"integration-secret",
        clock,
    )
    .unwrap();
    assert!(verifier.verify("chunks/c1.mp3", expires, &query["signature"], now()));
    assert!(!verifier.verify("chunks/c2.mp3", expires, &query["signature"], now()));
}
