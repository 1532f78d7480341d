use crate::artifact_store::Artifact;
use crate::clock::Clock;
use crate::url_signer::{SignedUrlProvider, SignerError};
use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshFailed {
    #[error(transparent)]
    Provider(#[from] SignerError),

    #[error("provider returned an invalid URL: {0:?}")]
    InvalidUrl(String),
}

/// New URL and expiry for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedUrl {
    pub access_url: String,
    pub url_expires_at: DateTime<Utc>,
}

/// Mints a replacement URL for a single artifact.
pub struct UrlRefresher {
    provider: Arc<dyn SignedUrlProvider>,
    clock: Arc<dyn Clock>,
    validity: Duration,
    validity_delta: chrono::Duration,
}

impl UrlRefresher {
    pub fn new(
        provider: Arc<dyn SignedUrlProvider>,
        clock: Arc<dyn Clock>,
        validity: Duration,
    ) -> anyhow::Result<Self> {
        let validity_delta =
            chrono::Duration::from_std(validity).context("URL validity window is out of range")?;
        Ok(Self {
            provider,
            clock,
            validity,
            validity_delta,
        })
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// The new expiry is `now + validity` with `now` read before the provider
    /// call, never derived from the old expiry.
    pub async fn refresh(&self, artifact: &Artifact) -> Result<RefreshedUrl, RefreshFailed> {
        let now = self.clock.now();
        let access_url = self
            .provider
            .mint_url(&artifact.storage_path, self.validity)
            .await?;
        validate_url(&access_url)?;

        Ok(RefreshedUrl {
            access_url,
            url_expires_at: now + self.validity_delta,
        })
    }
}

fn validate_url(url: &str) -> Result<(), RefreshFailed> {
    let invalid = || RefreshFailed::InvalidUrl(url.to_string());
    if url.trim().is_empty() {
        return Err(invalid());
    }
    let parsed = Url::parse(url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}
