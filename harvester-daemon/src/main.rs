//! # Harvester
//!
//! Keeps a Redis copy of the Hacker News item feed and schedules embedding
//! jobs for popular stories.
//!
//! `harvester run` (the default) starts the backfill loop, the eligibility
//! scan loop and the job workers, then waits for Ctrl-C or SIGTERM.
//! `backfill-once` and `scan-once` run a single pass and exit, which is handy
//! from cron or while debugging a deployment.

mod app;
mod cli;

use anyhow::Context;
use clap::Parser;
use harvester_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app::App;
use cli::{Cli, Command, ConfigArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.config)?;
    let app = App::connect(&config).await?;

    match cli.command() {
        Command::Run => run(app, &config).await,
        Command::BackfillOnce => {
            let report = app
                .backfill
                .run_once()
                .await
                .context("backfill run failed")?;
            info!(
                previous_watermark = %report.previous_watermark,
                upstream_max = %report.upstream_max,
                enqueued = report.enqueued,
                watermark = %report.watermark,
                "backfill pass complete"
            );
            Ok(())
        }
        Command::ScanOnce => {
            let report = app
                .scanner
                .run_full_scan()
                .await
                .context("eligibility scan failed")?;
            info!(?report, "scan pass complete");
            Ok(())
        }
    }
}

fn load_runtime_config(args: &ConfigArgs) -> anyhow::Result<Config> {
    let ConfigLoad { config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Scan summaries stay visible even when RUST_LOG is unset.
                "info,harvest::scan=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "configuration loaded from file");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    info!(
        redis = ?config.redis,
        backfill.interval_ms = config.harvester.backfill.interval_ms,
        scanner.interval_ms = config.harvester.scanner.interval_ms,
        scanner.score_threshold = config.harvester.scanner.score_threshold,
        workers = config.harvester.worker.concurrency,
        "effective configuration"
    );

    Ok(config)
}

async fn run(app: App, config: &Config) -> anyhow::Result<()> {
    let runtime = app.runtime(config);
    runtime.start().await.context("failed to start runtime")?;

    shutdown_signal().await;
    info!("shutdown signal received");

    runtime.shutdown().await.context("runtime shutdown failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
