//! Graceful shutdown on SIGINT (Ctrl+C), SIGTERM and SIGHUP.
//!
//! The first signal cancels a [`CancellationToken`] that the export run
//! checks between tickets: the ticket in flight is finished and the
//! checkpoint saved. A second signal exits immediately with status 130.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    Drain,
    ForceExit,
}

/// What the `nth` received signal (0-based) should do.
fn action_for(nth: u32) -> SignalAction {
    if nth == 0 {
        SignalAction::Drain
    } else {
        SignalAction::ForceExit
    }
}

/// Install the signal listeners and return the token they cancel.
///
/// Listener registration happens before this returns, so failures surface
/// here instead of inside the background task.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (signal(SignalKind::terminate())?, signal(SignalKind::hangup())?)
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        let mut received = 0u32;
        loop {
            #[cfg(unix)]
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
                _ = sighup.recv() => {}
            }

            #[cfg(not(unix))]
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl+C: {}", e);
                return;
            }

            match action_for(received) {
                SignalAction::Drain => {
                    tracing::info!("Received shutdown signal, finishing the current ticket...");
                    tracing::info!("Press Ctrl+C again to force exit");
                    handler_token.cancel();
                }
                SignalAction::ForceExit => {
                    tracing::warn!("Force exit requested, progress since the last checkpoint is lost");
                    std::process::exit(130);
                }
            }
            received += 1;
        }
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_drains_then_forces() {
        assert_eq!(action_for(0), SignalAction::Drain);
        assert_eq!(action_for(1), SignalAction::ForceExit);
        assert_eq!(action_for(7), SignalAction::ForceExit);
    }

    /// Signal delivery can't be safely tested in a shared test binary.
    #[tokio::test]
    async fn install_returns_live_token() {
        let token = install_signal_handler().unwrap();
        assert!(!token.is_cancelled());
    }
}
