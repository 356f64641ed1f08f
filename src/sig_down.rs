//! Graceful shutdown on SIGTERM / SIGINT.
//!
//! A background task listens for either signal and fires a [`CancellationToken`]
//! that subsystems (HTTP server, scheduler loops) observe to wind down.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct SigDown {
    _task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Register the signal handlers.
    ///
    /// Returns an error if signal registration with the runtime fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, shutting down");
                }
                _ = sigint.recv() => {
                    tracing::info!("SIGINT received, shutting down");
                }
            }
            task_token.cancel();
        });
        task_tracker.close();
        Ok(Self {
            _task_tracker: task_tracker,
            cancellation_token: token,
        })
    }

    /// A clone of the cancellation token for distribution to subsystems.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Resolves when a shutdown signal has been observed.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
    }
}
