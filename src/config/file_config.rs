use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub metrics_port: Option<u16>,

    pub url_refresh: Option<UrlRefreshConfig>,
    pub signer: Option<SignerFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct UrlRefreshConfig {
    pub interval_hours: Option<u64>,
    pub lookahead_days: Option<u64>,
    pub validity_days: Option<u64>,
    pub max_concurrency: Option<usize>,
    pub run_timeout_secs: Option<u64>,
    pub pool_size: Option<usize>,
    pub acquire_timeout_secs: Option<u64>,
    /// Family names to refresh: "audio_records", "flashcard_questions", "chunks"
    pub families: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SignerFileConfig {
    /// Provider to use: "storage_api" or "hmac"
    pub kind: Option<String>,
    pub request_timeout_secs: Option<u64>,

    // storage_api
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub api_key: Option<String>,

    // hmac
    pub base_url: Option<String>,
    pub secret: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
