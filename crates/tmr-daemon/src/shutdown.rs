//! Cooperative shutdown.
//!
//! Shutdown is a `watch` channel holding `true` once requested. The daemon
//! only looks at it between cycles and while sleeping.

use tokio::sync::watch;

/// A fresh shutdown channel, not yet triggered.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Install handlers for SIGTERM, SIGINT and SIGHUP (Ctrl-C elsewhere) and
/// return a receiver that flips to `true` on the first of them.
///
/// Must be called from within a tokio runtime.
pub fn listen_for_signals() -> std::io::Result<watch::Receiver<bool>> {
    let (tx, rx) = shutdown_channel();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        let mut int = signal(SignalKind::interrupt())?;
        let mut hup = signal(SignalKind::hangup())?;
        tokio::spawn(async move {
            let name = tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
                _ = hup.recv() => "SIGHUP",
            };
            tracing::info!(signal = name, "shutdown requested, finishing current cycle");
            let _ = tx.send(true);
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested, finishing current cycle");
                let _ = tx.send(true);
            }
        });
    }

    Ok(rx)
}
