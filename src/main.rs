//! CLI entry point for the packsync worker.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use packsync_core::config::resolve_default_config_path;
use packsync_core::{
    CapacityProbe, DeviceInfo, FixedCapacity, FreshnessStore, HttpAuthenticator, HttpClient,
    HttpFileDiscovery, MetadataBackend, ResumableDownloader, SamplingProbe, SidecarStore,
    SqliteStore, SyncConfig, SyncScheduleLoop, TenantSyncCoordinator, load_config,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod cli;

use cli::{Args, Command};

const FRESHNESS_DB_FILE: &str = "freshness.db";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config_path = config_path(&args)?;
    let config = load_config(&config_path)?;
    debug!(path = %config_path.display(), "config loaded");

    match args.command {
        Command::CheckConfig => {
            print_summary(&config);
            Ok(ExitCode::SUCCESS)
        }
        Command::Once => {
            let mut schedule = build_schedule(&config).await?;
            let cancel = cancel_on_ctrl_c();
            let results = schedule.run_cycle(&cancel).await;

            let mut any_failed = false;
            for (tenant, result) in &results {
                match result {
                    Ok(report) => info!(
                        tenant = %tenant,
                        downloaded = report.downloaded(),
                        skipped = report.skipped(),
                        failed = report.failed(),
                        cancelled = report.cancelled(),
                        "tenant synced"
                    ),
                    Err(_) => any_failed = true,
                }
            }
            if any_failed {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Command::Run => {
            let mut schedule = build_schedule(&config).await?;
            let cancel = cancel_on_ctrl_c();
            schedule.run(&cancel).await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn config_path(args: &Args) -> Result<PathBuf> {
    match &args.config {
        Some(path) => Ok(path.clone()),
        None => resolve_default_config_path()
            .context("No config path given and neither XDG_CONFIG_HOME nor HOME is set"),
    }
}

fn print_summary(config: &SyncConfig) {
    println!("config ok");
    println!("  cache_root: {}", config.cache_root.display());
    println!("  interval_minutes: {}", config.interval_minutes);
    println!("  metadata_backend: {}", config.metadata_backend.as_str());
    match config.fixed_capacity_mbps {
        Some(mbps) => println!("  capacity: fixed {mbps} Mbps"),
        None => println!("  capacity: sampled over {} ms", config.sample_window_ms),
    }
    println!("  tenants: {}", config.tenants.len());
    for tenant in &config.tenants {
        let discovery = if tenant.new_file_list_url.is_some() {
            "endpoint"
        } else {
            "static"
        };
        println!(
            "    {} ({} files, {discovery} discovery)",
            tenant.name,
            tenant.files.len()
        );
    }
}

async fn build_store(config: &SyncConfig) -> Result<Arc<dyn FreshnessStore>> {
    match config.metadata_backend {
        MetadataBackend::Sidecar => Ok(Arc::new(SidecarStore::new())),
        MetadataBackend::Sqlite => {
            tokio::fs::create_dir_all(&config.cache_root)
                .await
                .with_context(|| {
                    format!(
                        "Failed to create cache root '{}'",
                        config.cache_root.display()
                    )
                })?;
            let db_path = config.cache_root.join(FRESHNESS_DB_FILE);
            let store = SqliteStore::open(&db_path).await.with_context(|| {
                format!("Failed to open freshness database '{}'", db_path.display())
            })?;
            Ok(Arc::new(store))
        }
    }
}

async fn build_schedule(config: &SyncConfig) -> Result<SyncScheduleLoop> {
    let store = build_store(config).await?;

    let probe: Arc<dyn CapacityProbe> = match config.fixed_capacity_mbps {
        Some(mbps) => Arc::new(FixedCapacity(mbps)),
        None => Arc::new(SamplingProbe::new(config.sample_window())),
    };

    let transfer =
        HttpClient::new_with_timeouts(config.connect_timeout_secs, config.read_timeout_secs);
    let control = HttpClient::control(config.connect_timeout_secs, config.read_timeout_secs);

    let device = DeviceInfo::detect();
    debug!(?device, "device info detected");

    let coordinator = TenantSyncCoordinator::new(
        Arc::new(HttpAuthenticator::new(control.clone(), device)),
        Arc::new(HttpFileDiscovery::new(control)),
        probe,
        Arc::new(ResumableDownloader::new(transfer, store)),
        config.policy,
    );

    info!(
        tenants = config.tenants.len(),
        backend = config.metadata_backend.as_str(),
        "packsync starting"
    );
    Ok(SyncScheduleLoop::from_config(coordinator, config))
}

/// Token cancelled on the first Ctrl-C; partial files keep their markers.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, stopping after in-flight writes");
                trigger.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for interrupt"),
        }
    });
    cancel
}
