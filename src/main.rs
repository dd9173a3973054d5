#![forbid(unsafe_code)]

//! `task-autopilot` — handoff inactivity orchestrator binary.
//!
//! Bootstraps configuration from the environment, connects persistence,
//! builds the provider client, starts the reconciliation loop and the
//! HTTP surface, and tears everything down on SIGINT/SIGTERM.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use task_autopilot::config::GlobalConfig;
use task_autopilot::orchestrator::engine::{spawn_automation_loop, AutomationEngine};
use task_autopilot::persistence::db;
use task_autopilot::provider::twilio::TwilioClient;
use task_autopilot::provider::MessagingPort;
use task_autopilot::{http, AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "task-autopilot", about = "Handoff inactivity orchestrator", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the SQLite database path.
    #[arg(long)]
    db: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("task-autopilot bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::from_env()?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(db_path) = args.db {
        config.db_path = db_path;
    }
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let database = Arc::new(db::connect(&config.db_path).await?);
    info!(path = %config.db_path, "database connected");

    // ── Build provider client ───────────────────────────
    let (provider, workspace_sid): (Option<Arc<dyn MessagingPort>>, Option<String>) =
        match &config.provider {
            Some(provider_config) => {
                info!("messaging provider configured");
                (
                    Some(Arc::new(TwilioClient::new(provider_config))),
                    provider_config.workspace_sid.clone(),
                )
            }
            None => {
                warn!("messaging provider not configured; automation will be inert");
                (None, None)
            }
        };

    // ── Build engine and start the loop ─────────────────
    let engine = AutomationEngine::new(
        config.automation.clone(),
        Arc::clone(&database),
        provider,
        workspace_sid,
    );

    let ct = CancellationToken::new();
    let loop_handle = if config.automation.enabled {
        Some(spawn_automation_loop(Arc::clone(&engine), ct.clone()))
    } else {
        info!("automation loop disabled by TASKS_AUTO_ENABLED");
        None
    };

    // ── Serve HTTP until shutdown ───────────────────────
    let http_engine = Arc::clone(&engine);
    let http_ct = ct.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(http_engine, config.http_port, http_ct).await {
            error!(%err, "http server failed");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");
    ct.cancel();

    // ── Graceful teardown ───────────────────────────────
    if let Some(handle) = loop_handle {
        let _ = handle.await;
    }
    let _ = http_handle.await;
    engine.scheduler().cancel_all();
    database.close().await;

    info!("task-autopilot shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
