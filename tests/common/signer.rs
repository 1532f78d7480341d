//! Scripted signed-URL provider

use async_trait::async_trait;
use audio_url_refresher::url_signer::{SignedUrlProvider, SignerError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type MintHook = Box<dyn Fn(&str) + Send + Sync>;

/// Returns `https://cdn.test/<path>?sig=fresh` unless a failure was scripted
/// for the path. Every call is recorded.
#[derive(Default)]
pub struct ScriptedSigner {
    failures: Mutex<HashMap<String, SignerError>>,
    calls: Mutex<Vec<(String, Duration)>>,
    on_mint: Mutex<Option<MintHook>>,
}

#[allow(dead_code)]
impl ScriptedSigner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, storage_path: &str, error: SignerError) {
        self.failures
            .lock()
            .unwrap()
            .insert(storage_path.to_string(), error);
    }

    /// Runs `hook` with the storage path at the start of every call.
    pub fn on_mint(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_mint.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn validities(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().iter().map(|(_, v)| *v).collect()
    }

    pub fn fresh_url(storage_path: &str) -> String {
        format!("https://cdn.test/{}?sig=fresh", storage_path)
    }
}

#[async_trait]
impl SignedUrlProvider for ScriptedSigner {
    async fn mint_url(&self, storage_path: &str, validity: Duration) -> Result<String, SignerError> {
        self.calls
            .lock()
            .unwrap()
            .push((storage_path.to_string(), validity));
        if let Some(hook) = self.on_mint.lock().unwrap().as_ref() {
            hook(storage_path);
        }
        match self.failures.lock().unwrap().get(storage_path) {
            Some(error) => Err(error.clone()),
            None => Ok(Self::fresh_url(storage_path)),
        }
    }
}
