//! Shutdown signal handling: waits for SIGINT (any platform) or SIGTERM
//! (unix) before returning, so [`crate::run`] can join the scheduler
//! thread for an orderly exit rather than being killed mid-cycle.

/// Waits for either Ctrl-C or, on unix, SIGTERM. Matches the source's
/// process supervisor sending SIGTERM on a normal stop request; the
/// collector core itself owns no signal handling of its own (Non-goals:
/// the RPC/trapper/supervisor layer stays an external collaborator), this
/// binary is the thinnest possible host around it.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {e}; falling back to Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("received SIGINT"),
            _ = sigterm.recv() => log::info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("received Ctrl-C");
    }
}
