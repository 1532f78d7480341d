//! In-process stand-in for the storage API's signing endpoint

use super::constants::*;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// One accepted signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub bucket: String,
    pub path: String,
    pub expires_in: u64,
}

#[derive(Clone, Default)]
struct MockState {
    missing: Arc<Mutex<HashSet<String>>>,
    broken: Arc<Mutex<HashSet<String>>>,
    requests: Arc<Mutex<Vec<SignRequest>>>,
}

/// Storage API listening on a random local port.
///
/// When dropped, the server shuts down.
pub struct MockStorageApi {
    /// Storage API root to hand to the signer (e.g. "http://127.0.0.1:1234/storage/v1")
    pub endpoint: String,
    state: MockState,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl MockStorageApi {
    pub async fn spawn() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/storage/v1/object/sign/{bucket}/{*path}", post(sign_object))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            endpoint: format!("http://{}/storage/v1", addr),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Answers 400 `not_found` for this object, as the real API does.
    pub fn mark_missing(&self, path: &str) {
        self.state.missing.lock().unwrap().insert(path.to_string());
    }

    /// Answers 200 with an empty `signedURL` for this object.
    pub fn mark_broken(&self, path: &str) {
        self.state.broken.lock().unwrap().insert(path.to_string());
    }

    pub fn requests(&self) -> Vec<SignRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn sign_object(
    State(state): State<MockState>,
    Path((bucket, path)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Response {
    let bearer = format!("Bearer {}", STORAGE_API_KEY);
    let authorized = headers.get("authorization").and_then(|v| v.to_str().ok())
        == Some(bearer.as_str())
        && headers.get("apikey").and_then(|v| v.to_str().ok()) == Some(STORAGE_API_KEY);
    if !authorized {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"statusCode": "403", "error": "Unauthorized", "message": "invalid signature"})),
        )
            .into_response();
    }

    if state.missing.lock().unwrap().contains(&path) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"statusCode": "404", "error": "not_found", "message": "Object not found"})),
        )
            .into_response();
    }

    let expires_in = body["expiresIn"].as_u64().unwrap_or(0);
    state.requests.lock().unwrap().push(SignRequest {
        bucket: bucket.clone(),
        path: path.clone(),
        expires_in,
    });

    if state.broken.lock().unwrap().contains(&path) {
        return Json(json!({"signedURL": ""})).into_response();
    }

    Json(json!({
        "signedURL": format!("/object/sign/{}/{}?token=tok-{}", bucket, path, expires_in)
    }))
    .into_response()
}
