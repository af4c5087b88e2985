//! Process-level helpers.

use tokio::sync::watch;
use tracing::info;

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Shutdown broadcast: the sender flips to `true` once, receivers observe it.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Spawn a task that flips `tx` when the process is asked to stop.
pub fn spawn_shutdown_listener(tx: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    })
}

/// Shorten an id for logs ("0x1234…cdef").
pub fn short_id(id: &str) -> String {
    if id.len() <= 12 {
        return id.to_string();
    }
    match (id.get(..6), id.get(id.len() - 4..)) {
        (Some(head), Some(tail)) => format!("{head}…{tail}"),
        _ => id.to_string(),
    }
}
