use crate::config::GatewayConfig;
use std::sync::Arc;
use std::time::Duration;
use wagate::Gateway;
use wagate_cron::Crontab;

/// Populate the registry from the device store without blocking startup.
pub fn spawn_auto_login(gateway: Arc<Gateway>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match gateway.auto_login().await {
            Ok(summary) => tracing::info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                "startup auto-login done"
            ),
            Err(e) => tracing::error!(err = %e, "startup auto-login failed to list devices"),
        }
    })
}

/// Register the presence job if enabled. A bad schedule shuts the crontab
/// down instead of failing startup.
pub fn register_jobs(cron: &Crontab, config: &GatewayConfig, gateway: &Arc<Gateway>) -> bool {
    let presence = &config.cronjob.auto_presence;
    if !presence.enable {
        return false;
    }

    let schedule = presence.effective_schedule();
    let added = cron.add_job_with(
        schedule,
        |gateway: Arc<Gateway>| async move {
            let summary = gateway.broadcast_presence().await;
            tracing::debug!(
                attempted = summary.attempted,
                failed = summary.failed,
                "auto presence"
            );
        },
        gateway.clone(),
    );

    match added {
        Ok(()) => {
            tracing::info!(%schedule, "auto presence scheduled");
            true
        }
        Err(e) => {
            tracing::error!(%schedule, err = %e, "invalid auto presence schedule, cron disabled");
            cron.shutdown();
            false
        }
    }
}

/// Run the configured shutdown traversal within the grace period, then stop
/// the crontab.
pub async fn shutdown(gateway: &Gateway, cron: &Crontab, config: &GatewayConfig) {
    let action = config.shutdown_action();
    let grace = Duration::from_millis(config.shutdown.grace_ms);
    tracing::info!(?action, grace_ms = config.shutdown.grace_ms, "shutting down");

    match tokio::time::timeout(grace, gateway.shutdown(action)).await {
        Ok(Ok(Some(summary))) => tracing::info!(?summary, "shutdown traversal done"),
        Ok(Ok(None)) => {}
        Ok(Err(e)) => tracing::warn!(err = %e, "shutdown traversal failed"),
        Err(_) => tracing::warn!("shutdown traversal timed out"),
    }

    cron.shutdown();
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(err = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(err = %e, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}
