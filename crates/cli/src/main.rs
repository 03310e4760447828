// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `fleetd`: the runner-fleet orchestrator process. Loads configuration,
//! wires the concrete adapters into a `ScalerSupervisor`, and runs until
//! `SIGINT`/`SIGTERM`.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use fleet_adapters::{HttpProvider, HttpProviderConfig, InMemoryCoordinationStore, KubernetesEngine};
use fleet_core::{Clock, FleetError, HolderId, SystemClock};
use fleet_daemon::{Config, ScalerSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser)]
#[command(name = "fleetd", about = "Self-hosted CI runner fleet orchestrator")]
struct Cli {
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder().with_default_directive(tracing::Level::INFO.into()).from_env_lossy();

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().json().with_target(true).with_filter(env_filter);
            tracing_subscriber::registry().with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer().with_target(true).with_filter(env_filter);
            tracing_subscriber::registry().with(layer).init();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(err) = run().await {
        error!(%err, "fleetd exiting");
        let code = err.downcast_ref::<FleetError>().and_then(FleetError::exit_code).unwrap_or(1);
        std::process::exit(code);
    }
    info!("fleetd shut down cleanly");
}

async fn run() -> Result<()> {
    let config = Config::load()?;
    info!(repos = ?config.repo_ids(), "configuration loaded");

    let engine = Arc::new(
        KubernetesEngine::new(config.kubernetes_namespace.clone())
            .await
            .map_err(|e| FleetError::FatalInit(format!("kubernetes engine unreachable: {e}")))?,
    );

    let provider = Arc::new(
        HttpProvider::new(HttpProviderConfig {
            base_url: config.provider_base_url.clone(),
            api_token: config.provider_api_token.clone(),
            timeout: Duration::from_secs(10),
        })
        .map_err(|e| FleetError::ConfigInvalid(format!("invalid provider configuration: {e}")))?,
    );

    let clock = SystemClock;
    let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
    let holder_id = HolderId::new(config.holder_id.clone());

    let mut supervisor = ScalerSupervisor::new(config, engine, provider, store, clock, holder_id)?;
    supervisor.start().await?;

    run_until_shutdown(&supervisor).await?;
    info!("shutdown signal received");
    supervisor.stop().await;
    Ok(())
}

/// Runs until `SIGINT`/`SIGTERM`. On Unix, `SIGUSR1` instead dumps the
/// current `StatusSnapshot` as JSON to the log and keeps running — a
/// debugging aid standing in for the HTTP status endpoint this crate
/// deliberately doesn't serve.
#[cfg(unix)]
async fn run_until_shutdown<E, P, S, C>(supervisor: &ScalerSupervisor<E, P, S, C>) -> Result<()>
where
    E: fleet_adapters::ContainerEngine + 'static,
    P: fleet_adapters::Provider + 'static,
    S: fleet_adapters::CoordinationStore + 'static,
    C: Clock,
{
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut dump_status = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())?;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            _ = terminate.recv() => return Ok(()),
            _ = dump_status.recv() => {
                let snapshot = supervisor.status().await;
                match serde_json::to_string(&snapshot) {
                    Ok(json) => info!(status = %json, "status snapshot"),
                    Err(e) => error!(%e, "failed to serialize status snapshot"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn run_until_shutdown<E, P, S, C>(_supervisor: &ScalerSupervisor<E, P, S, C>) -> Result<()>
where
    E: fleet_adapters::ContainerEngine + 'static,
    P: fleet_adapters::Provider + 'static,
    S: fleet_adapters::CoordinationStore + 'static,
    C: Clock,
{
    tokio::signal::ctrl_c().await?;
    Ok(())
}
