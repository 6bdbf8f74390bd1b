//! Shutdown on SIGTERM or SIGINT (Ctrl-C elsewhere).
//!
//! [`SigDown`] turns the first shutdown signal into a cancelled
//! [`CancellationToken`]. Hand clones of the token to the server and any
//! background task that must stop with it.
//!
//! ```ignore
//! let sig_down = SigDown::try_new()?;
//! let token = sig_down.cancellation_token();
//! axum::serve(listener, app)
//!     .with_graceful_shutdown(async move { token.cancelled().await })
//!     .await?;
//! ```

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a token on SIGTERM or Ctrl-C.
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Installs the signal handlers. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Signal registration fails.
    #[allow(clippy::unnecessary_wraps)] // Result needed on Unix for signal registration
    pub fn try_new() -> Result<Self, std::io::Error> {
        let token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let token = token.clone();
            task_tracker.spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
                }
                token.cancel();
            });
        }

        #[cfg(not(unix))]
        {
            let token = token.clone();
            task_tracker.spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("received Ctrl-C, shutting down");
                }
                token.cancel();
            });
        }

        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: token,
        })
    }

    /// A token cancelled on the first shutdown signal.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Resolves once a signal arrived and the listener task has finished.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
