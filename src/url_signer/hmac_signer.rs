use super::{encode_storage_path, SignedUrlProvider, SignerError};
use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Signs URLs for audio served by our own file server.
///
/// URL shape: `{base_url}/{path}?expires=<unix secs>&signature=<hex>` where the
/// signature is HMAC-SHA256 over `"{path}:{expires}"`.
pub struct HmacUrlSigner {
    base_url: String,
    keyed: HmacSha256,
    clock: Arc<dyn Clock>,
}

impl HmacUrlSigner {
    pub fn new(base_url: &str, secret: &[u8], clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("HMAC signing secret must not be empty");
        }
        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("Invalid HMAC signing secret: {}", e))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            keyed,
            clock,
        })
    }

    fn mac(&self, path: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(path.as_bytes());
        mac.update(b":");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    fn sign(&self, path: &str, expires: i64) -> String {
        hex::encode(self.mac(path, expires).finalize().into_bytes())
    }

    /// Checks a signature produced by [`mint_url`](SignedUrlProvider::mint_url).
    ///
    /// `path` is the encoded path as it appears in the URL.
    pub fn verify(&self, path: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if expires <= now.timestamp() {
            return false;
        }
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        self.mac(path, expires).verify_slice(&expected).is_ok()
    }
}

#[async_trait]
impl SignedUrlProvider for HmacUrlSigner {
    async fn mint_url(&self, storage_path: &str, validity: Duration) -> Result<String, SignerError> {
        let path = encode_storage_path(storage_path)?;
        let validity_secs = i64::try_from(validity.as_secs())
            .map_err(|_| SignerError::InvalidResponse("validity window too large".to_string()))?;
        let expires = self.clock.now().timestamp() + validity_secs;
        let signature = self.sign(&path, expires);
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.base_url, path, expires, signature
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn signer() -> HmacUrlSigner {
        HmacUrlSigner::new(
            "https://files.test/audio/",
            b"s3cret",
            Arc::new(FixedClock::new(now())),
        )
        .unwrap()
    }

    fn query_param<'a>(url: &'a str, key: &str) -> &'a str {
        let query = url.split_once('?').unwrap().1;
        query
            .split('&')
            .find_map(|kv| kv.strip_prefix(&format!("{}=", key)))
            .unwrap()
    }

    #[tokio::test]
    async fn minted_url_carries_expiry_and_valid_signature() {
        let signer = signer();
        let url = signer
            .mint_url("words/hello.mp3", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.starts_with("https://files.test/audio/words/hello.mp3?"));
        let expires: i64 = query_param(&url, "expires").parse().unwrap();
        assert_eq!(expires, now().timestamp() + 3600);

        let signature = query_param(&url, "signature");
        assert!(signer.verify("words/hello.mp3", expires, signature, now()));
    }

    #[tokio::test]
    async fn verify_rejects_tampering_and_expired_links() {
        let signer = signer();
        let url = signer
            .mint_url("words/hello.mp3", Duration::from_secs(60))
            .await
            .unwrap();
        let expires: i64 = query_param(&url, "expires").parse().unwrap();
        let signature = query_param(&url, "signature");

        assert!(!signer.verify("words/other.mp3", expires, signature, now()));
        assert!(!signer.verify("words/hello.mp3", expires + 1, signature, now()));
        assert!(!signer.verify("words/hello.mp3", expires, "zz", now()));
        assert!(!signer.verify(
            "words/hello.mp3",
            expires,
            signature,
            now() + chrono::Duration::seconds(61)
        ));
    }

    #[tokio::test]
    async fn blank_path_is_rejected() {
        let err = signer().mint_url("  ", Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, SignerError::InvalidPath(_)));
    }
}
