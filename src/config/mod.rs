mod file_config;

pub use file_config::{FileConfig, SignerFileConfig, UrlRefreshConfig};

use crate::artifact_store::ArtifactFamily;
use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;
use std::time::Duration;

const HOUR_SECS: u64 = 3600;
const DAY_SECS: u64 = 24 * HOUR_SECS;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub metrics_port: u16,
    pub url_refresh: UrlRefreshSettings,
    pub signer: SignerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRefreshSettings {
    pub interval: Duration,
    pub lookahead: Duration,
    pub validity: Duration,
    pub max_concurrency: usize,
    pub run_timeout: Duration,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub families: Vec<ArtifactFamily>,
}

impl Default for UrlRefreshSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * HOUR_SECS),
            lookahead: Duration::from_secs(3 * DAY_SECS),
            validity: Duration::from_secs(30 * DAY_SECS),
            max_concurrency: 8,
            run_timeout: Duration::from_secs(1800),
            pool_size: 4,
            acquire_timeout: Duration::from_secs(10),
            families: ArtifactFamily::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerConfig {
    pub kind: SignerKind,
    pub request_timeout_secs: u64,
}

#[derive(Clone, PartialEq, Eq)]
pub enum SignerKind {
    StorageApi {
        endpoint: String,
        bucket: String,
        api_key: String,
    },
    Hmac {
        base_url: String,
        secret: String,
    },
}

// Keeps credentials out of logs.
impl std::fmt::Debug for SignerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignerKind::StorageApi {
                endpoint, bucket, ..
            } => f
                .debug_struct("StorageApi")
                .field("endpoint", endpoint)
                .field("bucket", bucket)
                .field("api_key", &"<redacted>")
                .finish(),
            SignerKind::Hmac { base_url, .. } => f
                .debug_struct("Hmac")
                .field("base_url", base_url)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let url_refresh = resolve_url_refresh(file.url_refresh.unwrap_or_default())?;
        let signer = resolve_signer(
            file.signer
                .ok_or_else(|| anyhow!("[signer] section is required in the config file"))?,
        )?;

        Ok(Self {
            db_dir,
            metrics_port,
            url_refresh,
            signer,
        })
    }

    pub fn artifact_db_path(&self) -> PathBuf {
        self.db_dir.join("artifacts.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }
}

fn resolve_url_refresh(file: UrlRefreshConfig) -> Result<UrlRefreshSettings> {
    let defaults = UrlRefreshSettings::default();

    let families = match file.families {
        Some(names) => parse_families(&names)?,
        None => defaults.families,
    };

    let settings = UrlRefreshSettings {
        interval: file
            .interval_hours
            .map(|h| Duration::from_secs(h * HOUR_SECS))
            .unwrap_or(defaults.interval),
        lookahead: file
            .lookahead_days
            .map(|d| Duration::from_secs(d * DAY_SECS))
            .unwrap_or(defaults.lookahead),
        validity: file
            .validity_days
            .map(|d| Duration::from_secs(d * DAY_SECS))
            .unwrap_or(defaults.validity),
        max_concurrency: file.max_concurrency.unwrap_or(defaults.max_concurrency),
        run_timeout: file
            .run_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.run_timeout),
        pool_size: file.pool_size.unwrap_or(defaults.pool_size),
        acquire_timeout: file
            .acquire_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.acquire_timeout),
        families,
    };

    if settings.interval.is_zero() {
        bail!("url_refresh.interval_hours must be greater than 0");
    }
    if settings.run_timeout.is_zero() {
        bail!("url_refresh.run_timeout_secs must be greater than 0");
    }
    if settings.max_concurrency == 0 {
        bail!("url_refresh.max_concurrency must be greater than 0");
    }
    if settings.pool_size == 0 {
        bail!("url_refresh.pool_size must be greater than 0");
    }
    // Freshly minted URLs must land outside the next scan's horizon.
    if settings.validity <= settings.lookahead {
        bail!(
            "url_refresh.validity_days ({}) must be greater than lookahead_days ({})",
            settings.validity.as_secs() / DAY_SECS,
            settings.lookahead.as_secs() / DAY_SECS
        );
    }

    Ok(settings)
}

fn parse_families(names: &[String]) -> Result<Vec<ArtifactFamily>> {
    if names.is_empty() {
        bail!("url_refresh.families must name at least one family");
    }
    let mut families = Vec::new();
    for name in names {
        let family = ArtifactFamily::parse(name).ok_or_else(|| {
            anyhow!(
                "Unknown artifact family '{}' (expected audio_records, flashcard_questions or chunks)",
                name
            )
        })?;
        if !families.contains(&family) {
            families.push(family);
        }
    }
    Ok(families)
}

fn resolve_signer(file: SignerFileConfig) -> Result<SignerConfig> {
    fn required(value: Option<String>, field: &str) -> Result<String> {
        value
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("signer.{} is required", field))
    }

    let kind = match file.kind.as_deref() {
        Some("storage_api") => SignerKind::StorageApi {
            endpoint: required(file.endpoint, "endpoint")?,
            bucket: required(file.bucket, "bucket")?,
            api_key: required(file.api_key, "api_key")?,
        },
        Some("hmac") => SignerKind::Hmac {
            base_url: required(file.base_url, "base_url")?,
            secret: required(file.secret, "secret")?,
        },
        Some(other) => bail!(
            "Unknown signer kind '{}' (expected storage_api or hmac)",
            other
        ),
        None => bail!("signer.kind is required"),
    };

    Ok(SignerConfig {
        kind,
        request_timeout_secs: file.request_timeout_secs.unwrap_or(30),
    })
}
