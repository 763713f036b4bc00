//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGINT, SIGTERM)
//! - Translate signals into the internal shutdown event
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Signals and programmatic shutdown requests converge on the same
//!   [`Shutdown`] coordinator

use crate::lifecycle::shutdown::Shutdown;

/// Spawn the signal listeners onto the current runtime.
///
/// Whichever signal arrives first triggers shutdown; the tasks then end.
pub fn install(shutdown: Shutdown) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    tracing::error!(operation = "signals.install", error = %e, "SIGTERM handler unavailable");
                    wait_for_interrupt(&shutdown).await;
                    return;
                }
            };
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(operation = "signals.install", error = %e, "SIGINT handler failed");
                        return;
                    }
                    tracing::info!(signal = "SIGINT", "Shutdown signal received");
                }
                _ = term.recv() => {
                    tracing::info!(signal = "SIGTERM", "Shutdown signal received");
                }
            }
            shutdown.trigger();
        }
        #[cfg(not(unix))]
        {
            wait_for_interrupt(&shutdown).await;
        }
    });
}

async fn wait_for_interrupt(shutdown: &Shutdown) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!(signal = "SIGINT", "Shutdown signal received");
            shutdown.trigger();
        }
        Err(e) => {
            tracing::error!(operation = "signals.install", error = %e, "SIGINT handler failed");
        }
    }
}
