//! SIGTERM / SIGINT handling for the CLI.
//!
//! A signal cancels the running job's token; the pipeline then terminates
//! its child process and runs its own cleanup before returning.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token handed to the job; cancelled on the first signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGTERM or SIGINT, then cancel the job token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), cancelling job...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling job...");
            }
            _ = self.token.cancelled() => {
                return;
            }
        }

        self.token.cancel();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_once_token_is_cancelled() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        token.cancel();

        // Returns immediately instead of waiting for a signal
        tokio::time::timeout(std::time::Duration::from_secs(1), coordinator.wait_for_signal())
            .await
            .unwrap();
        assert!(coordinator.token().is_cancelled());
    }
}
