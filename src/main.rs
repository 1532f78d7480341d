use anyhow::{bail, Context, Result};
use audio_url_refresher::admin::run_admin_server;
use audio_url_refresher::artifact_store::{ConnectionPool, SqliteArtifactStore};
use audio_url_refresher::background_jobs::{create_scheduler, jobs::UrlRefreshJob, BackgroundJob};
use audio_url_refresher::clock::{Clock, SystemClock};
use audio_url_refresher::config::{AppConfig, CliConfig, FileConfig};
use audio_url_refresher::metrics;
use audio_url_refresher::server_store::{ServerStore, SqliteServerStore};
use audio_url_refresher::url_refresh::{ExpiryScanner, RefreshCoordinator, RunLimits, UrlRefresher};
use audio_url_refresher::url_signer::build_signer;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI flags.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Directory holding artifacts.db and server.db.
    #[clap(long)]
    pub db_dir: Option<PathBuf>,

    /// The port for the metrics and admin server.
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Run every enabled family once, print the summaries and exit.
    #[clap(long)]
    pub run_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        metrics_port: cli_args.metrics_port,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;
    info!("Signer: {:?}", config.signer.kind);

    metrics::init_metrics();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let signer = build_signer(&config.signer, clock.clone())?;

    info!(
        "Opening artifact database at {:?}...",
        config.artifact_db_path()
    );
    let settings = &config.url_refresh;
    let pool = ConnectionPool::open(
        config.artifact_db_path(),
        settings.pool_size,
        settings.acquire_timeout,
    )?;

    info!("Opening server database at {:?}...", config.server_db_path());
    let server_store: Arc<dyn ServerStore> = Arc::new(SqliteServerStore::new(
        config.server_db_path(),
    )?);

    let shutdown_token = CancellationToken::new();
    let (mut scheduler, scheduler_handle) =
        create_scheduler(server_store, shutdown_token.clone());

    let lookahead = chrono::Duration::from_std(settings.lookahead)
        .context("url_refresh.lookahead_days is out of range")?;
    let limits = RunLimits {
        max_concurrency: settings.max_concurrency,
        run_timeout: settings.run_timeout,
    };

    let mut job_ids = Vec::new();
    for family in &settings.families {
        let coordinator = RefreshCoordinator::new(
            Arc::new(SqliteArtifactStore::new(pool.clone(), *family)),
            ExpiryScanner::new(clock.clone(), lookahead),
            UrlRefresher::new(signer.clone(), clock.clone(), settings.validity)?,
            clock.clone(),
            limits,
        );
        let job = UrlRefreshJob::new(Arc::new(coordinator), settings.interval);
        job_ids.push(job.id());
        scheduler.register_job(Arc::new(job)).await;
    }

    if cli_args.run_once {
        let mut failed_runs = 0;
        for job_id in job_ids {
            let details = match scheduler.run_job_now(job_id, "run_once").await {
                Ok(details) => details,
                Err(e) => {
                    error!("Run of {} failed: {}", job_id, e);
                    failed_runs += 1;
                    e.details().cloned()
                }
            };
            if let Some(details) = details {
                let rendered = serde_json::to_string_pretty(&details)
                    .context("Failed to render run summary")?;
                println!("{}", rendered);
            }
        }
        pool.close();
        if failed_runs > 0 {
            bail!("{} refresh run(s) failed", failed_runs);
        }
        return Ok(());
    }

    let scheduler_task = tokio::spawn(async move {
        scheduler.run().await;
    });
    let admin_shutdown = shutdown_token.clone();
    let metrics_port = config.metrics_port;
    let admin_task = tokio::spawn(async move {
        let result = run_admin_server(scheduler_handle, metrics_port, admin_shutdown.clone()).await;
        // Without the admin server the process stops too.
        if result.is_err() {
            admin_shutdown.cancel();
        }
        result
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
        _ = shutdown_token.cancelled() => {}
    }
    shutdown_token.cancel();

    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
    match admin_task.await {
        Ok(Err(e)) => error!("{:#}", e),
        Err(e) => error!("Admin server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    pool.close();
    info!("Shutdown complete");
    Ok(())
}
