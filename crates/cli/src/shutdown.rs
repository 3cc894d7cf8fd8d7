//! Signal handling

use runner::AbortSignal;
use tracing::warn;

/// Raise `abort` on Ctrl+C or SIGTERM
///
/// The runner finishes the stage in flight and marks the rest aborted.
pub async fn raise_on_signal(abort: AbortSignal) {
    wait_for_signal().await;
    warn!("Received shutdown signal, stopping after the current stage...");
    abort.raise();
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
