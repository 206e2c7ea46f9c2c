//! Background ledger sweeping on a timer.
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::service::ShareService;
use crate::store::Datastore;

/// Spawns the periodic sweep task.
pub struct SweepRuntime;

impl SweepRuntime {
    /// Start sweeping every `sweep_interval` of the service's config. Must
    /// be called from within a tokio runtime.
    pub fn spawn<S>(service: Arc<ShareService<S>>) -> SweepHandle
    where
        S: Datastore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(sweep_loop(service, shutdown_rx));
        SweepHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running sweep task.
pub struct SweepHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop the task and wait for it to exit. A sweep already in progress
    /// finishes first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("sweep task ended abnormally: {e}");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

async fn sweep_loop<S: Datastore>(service: Arc<ShareService<S>>, mut shutdown: oneshot::Receiver<()>) {
    let period = service.config().get_sweep_interval();
    let mut ticker = tokio::time::interval(period);
    // Skip the immediate first tick
    ticker.tick().await;
    tracing::debug!(?period, "sweep runtime started");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                match service.sweep_tick().await {
                    Ok(outcomes) => tracing::debug!(swept = outcomes.len(), "sweep tick"),
                    Err(e) => tracing::warn!("ledger sweep failed: {e}"),
                }
            }
        }
    }

    tracing::debug!("sweep runtime stopped");
}
