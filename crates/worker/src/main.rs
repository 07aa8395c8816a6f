//! Batch generation worker.
//!
//! Fetches ready records from the record store, plans one job per record
//! and variation, runs them through the configured providers, and writes
//! results back. `--dry-run` stops after planning and prints the cost
//! estimate.
//!
//! # Environment variables
//!
//! | Variable                  | Required        | Default                       | Description                              |
//! |---------------------------|-----------------|-------------------------------|------------------------------------------|
//! | `AIRTABLE_API_KEY`        | yes             |                               | Record store token                       |
//! | `AIRTABLE_BASE_ID`        | yes             |                               | Record store base                        |
//! | `AIRTABLE_TABLE_NAME`     | no              | `Content`                     | Table holding the records                |
//! | `AIRTABLE_FILTER`         | no              | `{<status field>} = 'Pending'`| Formula selecting ready records          |
//! | `GOOGLE_API_KEY`          | no              |                               | Enables Google image and video adapters  |
//! | `WAVESPEED_API_KEY`       | no              |                               | Enables the WaveSpeed video adapter      |
//! | `GENBATCH_CATALOG_PATH`   | no              | built-in                      | Provider catalog JSON                    |
//! | `GENBATCH_MEDIA_BACKEND`  | no              | `local`                       | `local` or `s3`                          |
//! | `GENBATCH_MEDIA_DIR`      | no              | `output`                      | Local media directory                    |
//! | `GENBATCH_MEDIA_BASE_URL` | no              | `http://localhost:8000/media` | URL the local directory is served at     |
//! | `GENBATCH_S3_BUCKET`      | with `s3`       |                               | Bucket for generated media               |
//! | `GENBATCH_S3_PUBLIC_URL`  | with `s3`       |                               | Public base URL of the bucket            |
//! | `GENBATCH_S3_PREFIX`      | no              | `generated`                   | Key prefix                               |
//! | `GENBATCH_S3_ENDPOINT`    | no              |                               | S3-compatible endpoint                   |
//! | `LOG_FORMAT`              | no              | `text`                        | `json` for structured logs               |
//!
//! Engine tuning (`GENBATCH_POLL_*`, `GENBATCH_MASK_*`, ...) is documented
//! on `EngineConfig::from_env`.

mod cli;
mod setup;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use genbatch_core::store::RecordStore;
use genbatch_pipeline::{ingest, BatchEvent, BatchEvents, EngineConfig, Orchestrator, StorePublisher};
use genbatch_store::AirtableStore;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use setup::MediaBackend;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "genbatch_worker=info,genbatch_pipeline=info,genbatch_providers=info,genbatch_store=info".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Batch aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let lookup = |key: &str| std::env::var(key).ok();

    // --- Configuration ---
    let config = EngineConfig::from_env()?;
    let catalog = setup::catalog(cli.catalog.as_deref())?;
    let adapters = setup::adapters(&lookup)?;
    let fields = config.fields(cli.kind).clone();

    // --- Stores ---
    let records: Arc<dyn RecordStore> = Arc::new(AirtableStore::new(setup::airtable(&lookup, &fields)?)?);
    let media = MediaBackend::from_lookup(&lookup)?.build().await?;

    let fetched = records.fetch_ready().await.context("fetching ready records")?;
    let (mut ready, skipped) = ingest(&fetched, &fields);
    if let Some(limit) = cli.limit {
        ready.truncate(limit);
    }

    let events = BatchEvents::default();
    let progress = tokio::spawn(log_progress(events.clone()));

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(catalog),
        adapters,
        media,
        Arc::new(StorePublisher::new(records)),
    )?
    .with_events(events);

    let request = cli.batch_request();
    let plan = orchestrator.plan(ready, skipped, &request)?;

    let report = if cli.dry_run {
        orchestrator.pre_run_report(&plan)
    } else {
        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));
        orchestrator.execute(plan, &cancel).await
    };

    // Closing the channel ends the progress task.
    drop(orchestrator);
    let _ = progress.await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

/// Log one line per resolved job until the event channel closes.
async fn log_progress(events: BatchEvents) {
    let mut rx = events.subscribe();
    drop(events);
    loop {
        match rx.recv().await {
            Ok(BatchEvent::JobResolved { label, success, resolved, total, .. }) => {
                tracing::info!(job = %label, success, "Done ({resolved}/{total})");
            }
            Ok(BatchEvent::Finished { succeeded, failed, cancelled, .. }) => {
                tracing::info!(succeeded, failed, cancelled, "Batch finished");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "Progress log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Cancel the batch on SIGINT or SIGTERM. Outstanding jobs resolve as
/// cancelled and finished work is still published.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::warn!("Received SIGINT, cancelling batch"),
        () = terminate => tracing::warn!("Received SIGTERM, cancelling batch"),
    }
    cancel.cancel();
}
