//! swarmd — the codeswarm orchestrator daemon.

use anyhow::{Context, Result};
use tracing::{error, info};

use swarm_core::config::Config;
use swarm_daemon::daemon::Daemon;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("failed to load config, using defaults: {e}");
        Config::default()
    });

    swarm_telemetry::logging::init_logging("swarmd", &config.general.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "swarmd starting"
    );

    // Fatal init failures (missing JWT secret, unreachable store,
    // missing provider token) exit non-zero.
    let daemon = Daemon::new(config)
        .await
        .context("daemon initialisation failed")?;

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("termination signal received, initiating graceful shutdown");
        shutdown.trigger();
    });

    if let Err(e) = daemon.run().await {
        error!(error = %e, "daemon execution failed");
        return Err(e);
    }

    Ok(())
}

/// Resolve on ctrl-c or SIGTERM, whichever lands first.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
