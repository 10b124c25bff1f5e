use std::path::Path;

use claw_sync::config::{self, SyncConfig};
use claw_sync::sync::SyncDaemon;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = config::log_dir_from_env();
    let _log_guard = init_tracing(log_dir.as_deref());

    let config = SyncConfig::load().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    eprintln!("Claw Sync v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Sessions: {}", config.sessions_dir.display());
    eprintln!("   Cron: {}", config.jobs_file.display());
    eprintln!("   Interval: {}s", config.interval.as_secs());
    match &config.remote {
        Some(remote) => eprintln!("   Remote: {}", remote.url),
        None => eprintln!("   Remote: not configured (local mode)"),
    }

    let mut daemon = SyncDaemon::new(config);

    if once {
        let report = daemon.run_cycle().await?;
        tracing::info!(
            agents = report.agents.attempted,
            jobs = report.jobs.attempted,
            failed = report.failed(),
            "Single sync cycle complete"
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    eprintln!("   Press Ctrl+C to stop.\n");
    daemon.run(shutdown).await;

    Ok(())
}

/// Console logging plus an optional daily-rolling file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "claw-sync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

/// Cancel `shutdown` on Ctrl+C (and SIGTERM on unix).
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("Could not install SIGTERM handler: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::info!("Shutdown requested");
        shutdown.cancel();
    });
}
