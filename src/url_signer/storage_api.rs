//! Client for a Supabase-compatible storage API.

use super::{encode_storage_path, SignedUrlProvider, SignerError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct SignRequest {
    #[serde(rename = "expiresIn")]
    expires_in: u64,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

/// Mints URLs through `POST {endpoint}/object/sign/{bucket}/{path}`.
pub struct StorageApiSigner {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    api_key: String,
}

impl StorageApiSigner {
    /// # Arguments
    /// * `endpoint` - Storage API root (e.g., "https://project.supabase.co/storage/v1")
    /// * `bucket` - Bucket holding the audio objects
    /// * `api_key` - Service key sent as bearer token and `apikey` header
    /// * `timeout` - Per-request timeout
    pub fn new(endpoint: &str, bucket: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn absolute_url(&self, signed: &str) -> String {
        if signed.starts_with("http://") || signed.starts_with("https://") {
            signed.to_string()
        } else if signed.starts_with('/') {
            format!("{}{}", self.endpoint, signed)
        } else {
            format!("{}/{}", self.endpoint, signed)
        }
    }
}

fn classify_failure(status: StatusCode, body: String, storage_path: &str) -> SignerError {
    let lowered = body.to_ascii_lowercase();
    let mentions_not_found = lowered.contains("not found") || lowered.contains("not_found");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SignerError::PermissionDenied(body),
        StatusCode::NOT_FOUND => SignerError::ObjectNotFound(storage_path.to_string()),
        // The storage API reports missing objects as 400 with a not_found payload.
        StatusCode::BAD_REQUEST if mentions_not_found => {
            SignerError::ObjectNotFound(storage_path.to_string())
        }
        _ => SignerError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl SignedUrlProvider for StorageApiSigner {
    async fn mint_url(&self, storage_path: &str, validity: Duration) -> Result<String, SignerError> {
        let path = encode_storage_path(storage_path)?;
        let url = format!("{}/object/sign/{}/{}", self.endpoint, self.bucket, path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .json(&SignRequest {
                expires_in: validity.as_secs(),
            })
            .send()
            .await
            .map_err(|e| SignerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("Signing {} failed with status {}: {}", storage_path, status, body);
            return Err(classify_failure(status, body, storage_path));
        }

        let parsed: SignResponse = response
            .json()
            .await
            .map_err(|e| SignerError::InvalidResponse(e.to_string()))?;
        if parsed.signed_url.trim().is_empty() {
            return Err(SignerError::InvalidResponse("empty signedURL".to_string()));
        }
        Ok(self.absolute_url(&parsed.signed_url))
    }
}
