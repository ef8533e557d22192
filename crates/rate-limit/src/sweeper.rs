//! Background eviction of expired quota windows.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::manager::QuotaManager;

/// A handle to the recurring sweep task.
///
/// The task is spawned explicitly by whichever component owns the
/// [`QuotaManager`], never as a construction side effect, so shutdown
/// ordering stays deterministic: cancel the sweeper first, flush after.
pub struct Sweeper {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Sweeper {
    /// Spawn the sweep loop. The first sweep runs immediately, clearing
    /// whatever expired while the process was down; subsequent sweeps
    /// run once per `interval`.
    pub fn spawn(manager: Arc<QuotaManager>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            log::debug!("Started the quota sweep loop, running every {interval:?}");

            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => manager.sweep().await,
                }
            }

            log::debug!("Quota sweep loop stopped");
        });

        Self { handle, cancel }
    }

    /// Cancel the loop cooperatively and wait for the current iteration
    /// to finish.
    pub async fn stop(self) {
        self.cancel.cancel();

        if let Err(err) = self.handle.await {
            log::warn!("The sweep task did not shut down cleanly: {err}");
        }
    }
}
