use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Create the agent-wide `CancellationToken` and arm the signal
/// handlers that cancel it.
///
/// Cancellation is the whole shutdown story here: flow state is
/// reconstructible from the registries on the next start, so no drain
/// or flush phase runs — background tasks just stop at their next
/// suspension point.
pub fn create_shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let armed = token.clone();

    tokio::spawn(async move {
        let signal_name = wait_for_shutdown_signal().await;
        info!(signal = signal_name, "shutdown signal received, cancelling tasks");
        armed.cancel();
    });

    token
}

/// Block until SIGINT or SIGTERM arrives and report which one it was.
async fn wait_for_shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                // Without a SIGTERM handler the agent still stops on
                // Ctrl+C; degraded, not fatal.
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return "SIGINT";
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        "SIGINT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_starts_uncancelled() {
        let token = create_shutdown_token();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn clones_observe_cancellation() {
        let token = create_shutdown_token();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
