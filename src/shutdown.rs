//! Graceful Shutdown Handling
//!
//! Turns SIGTERM/SIGINT into cancellation of in-flight chain attempts and
//! relays. Everything that should stop on shutdown holds a child of the
//! coordinator's token.

use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Owns the root cancellation token for the process.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token that fires when shutdown starts. Cancelling it does not affect
    /// the coordinator or its other children.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Start shutdown without waiting for a signal.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            debug!("Shutdown triggered");
            self.token.cancel();
        }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then cancel every token handed out.
    pub async fn listen_for_signals(&self) -> std::io::Result<()> {
        debug!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, cancelling"),
                _ = sigint.recv() => info!("Received SIGINT, cancelling"),
                _ = self.token.cancelled() => return Ok(()),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                res = signal::ctrl_c() => {
                    res?;
                    info!("Received Ctrl+C, cancelling");
                }
                _ = self.token.cancelled() => return Ok(()),
            }
        }

        self.trigger();
        Ok(())
    }

    /// Wait until shutdown starts, or `limit` elapses. Returns whether it started.
    pub async fn wait(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.token.cancelled()).await.is_ok()
    }
}
