//! Signal handling for operator interrupts.
//!
//! SIGINT and SIGTERM cancel a shared [`CancellationToken`]. The bootstrap
//! observes the token between steps and while waiting on the issuer, so an
//! interrupt still runs responder teardown before the process exits.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Signal that ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// Wait for the next shutdown signal
#[cfg(unix)]
pub async fn shutdown_signal() -> SignalType {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            return ctrl_c_only().await;
        }
    };

    tokio::select! {
        signal = ctrl_c_only() => signal,
        _ = term.recv() => SignalType::Terminate,
    }
}

/// Wait for the next shutdown signal
#[cfg(not(unix))]
pub async fn shutdown_signal() -> SignalType {
    ctrl_c_only().await
}

async fn ctrl_c_only() -> SignalType {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    SignalType::Interrupt
}

/// Cancel `token` on the first shutdown signal.
///
/// The returned task ends once the signal arrives or the token is cancelled
/// by someone else.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = shutdown_signal() => {
                warn!(signal = ?signal, "Interrupted, cleaning up");
                token.cancel();
            }
            _ = token.cancelled() => {
                debug!("Signal watcher finished");
            }
        }
    })
}
