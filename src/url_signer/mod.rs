//! Signed URL providers.
//!
//! A provider turns a storage path and a validity window into a URL that grants
//! temporary read access to the object. Authentication with the storage
//! backend is resolved when the provider is built.

mod hmac_signer;
mod storage_api;

pub use hmac_signer::HmacUrlSigner;
pub use storage_api::StorageApiSigner;

use crate::clock::Clock;
use crate::config::{SignerConfig, SignerKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("object not found in storage: {0}")]
    ObjectNotFound(String),

    #[error("permission denied by storage: {0}")]
    PermissionDenied(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status} from storage: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid response from storage: {0}")]
    InvalidResponse(String),

    #[error("invalid storage path: {0:?}")]
    InvalidPath(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignedUrlProvider: Send + Sync {
    /// Mints a URL for `storage_path` that stays valid for `validity`.
    async fn mint_url(&self, storage_path: &str, validity: Duration) -> Result<String, SignerError>;
}

/// Normalizes a storage path into percent-encoded segments.
pub(crate) fn encode_storage_path(storage_path: &str) -> Result<String, SignerError> {
    let trimmed = storage_path.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(SignerError::InvalidPath(storage_path.to_string()));
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(SignerError::InvalidPath(storage_path.to_string()));
        }
        segments.push(urlencoding::encode(segment).into_owned());
    }
    Ok(segments.join("/"))
}

/// Builds the provider selected by `config.kind`.
pub fn build_signer(
    config: &SignerConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SignedUrlProvider>> {
    let signer: Arc<dyn SignedUrlProvider> = match &config.kind {
        SignerKind::StorageApi {
            endpoint,
            bucket,
            api_key,
        } => Arc::new(
            StorageApiSigner::new(
                endpoint,
                bucket,
                api_key,
                Duration::from_secs(config.request_timeout_secs),
            )
            .context("Failed to build storage API signer")?,
        ),
        SignerKind::Hmac { base_url, secret } => Arc::new(
            HmacUrlSigner::new(base_url, secret.as_bytes(), clock)
                .context("Failed to build HMAC URL signer")?,
        ),
    };
    Ok(signer)
}
