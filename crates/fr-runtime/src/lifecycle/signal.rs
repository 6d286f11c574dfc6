use tokio_util::sync::CancellationToken;

/// Register Ctrl-C (SIGINT) and SIGTERM handling; cancel the host on the
/// first signal received.
pub async fn wait_for_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        fr_info!(sys, signal = "SIGINT", "received signal, initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        fr_info!(sys, signal = "SIGTERM", "received signal, initiating graceful shutdown");
                    }
                    _ = cancel.cancelled() => return,
                }
            }
            Err(e) => {
                fr_warn!(sys, error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
                ctrl_c(&cancel).await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c(&cancel).await;
    cancel.cancel();
}

async fn ctrl_c(cancel: &CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => fr_info!(sys, "received shutdown signal, initiating graceful shutdown"),
            Err(e) => fr_error!(sys, error = %e, "failed to listen for Ctrl-C, shutting down"),
        },
        _ = cancel.cancelled() => {}
    }
}
