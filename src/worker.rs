use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle for a spawned periodic worker
pub struct WorkerHandle {
    name: &'static str,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn new(
        name: &'static str,
        shutdown_tx: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        WorkerHandle {
            name,
            shutdown_tx,
            task,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the worker and wait for it to finish its final pass
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("{} worker ended abnormally: {}", self.name, e);
        }
    }
}
