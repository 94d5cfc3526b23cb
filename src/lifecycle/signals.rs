//! OS signal handling.
//!
//! SIGINT (Ctrl+C) and SIGTERM both start the drain. No other signal is
//! handled.

use std::io;

use tokio::signal;

/// Wait for a termination signal.
///
/// Fails only if a handler could not be installed.
pub async fn termination() -> io::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = ctrl_c => {
                res?;
                tracing::warn!("Received Ctrl+C, starting graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("Received SIGTERM, starting graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        tracing::warn!("Received Ctrl+C, starting graceful shutdown");
    }

    Ok(())
}
