use tokio::signal;
use tracing::{info, warn};

/// Completes when the process receives SIGTERM or SIGINT.
///
/// Meant to be handed to `axum::serve(..).with_graceful_shutdown(..)`. If the
/// signal handlers cannot be registered the future never completes, so the
/// server keeps running and can still be stopped by SIGKILL.
pub async fn graceful_shutdown() {
    let (mut term, mut interrupt) = match (
        signal::unix::signal(signal::unix::SignalKind::terminate()),
        signal::unix::signal(signal::unix::SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(interrupt)) => (term, interrupt),
        (Err(e), _) | (_, Err(e)) => {
            warn!("failed to register shutdown signal handlers: {}", e);
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutdown signal received");
}
