//! Worker task owning a [`SyncController`]

use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
};

use crate::{
    error::SyncError,
    primitives::Notification,
    sync::SyncController,
    traits::{BlockSource, KeyValueStore},
};

/// Spawns sync workers
pub struct SyncService;

impl SyncService {
    /// Moves `controller` into a new task that handles notifications sent through the returned
    /// handle, one at a time.
    pub fn start<S, B>(controller: SyncController<S, B>) -> ServiceHandle<S, B>
    where
        S: KeyValueStore + Send + 'static,
        B: BlockSource + Send + Sync + 'static,
    {
        let (sender, inbox) = mpsc::unbounded_channel();
        let worker = tokio::spawn(async move {
            let mut controller = controller;
            let result = controller.run(inbox).await;
            result.map(|()| controller)
        });

        ServiceHandle { sender, worker }
    }
}

/// Inbox and join handle of a running sync worker
pub struct ServiceHandle<S, B> {
    sender: UnboundedSender<Notification>,
    worker: JoinHandle<Result<SyncController<S, B>, SyncError>>,
}

impl<S, B> ServiceHandle<S, B> {
    /// Additional sender into the worker's inbox. The worker keeps running until every sender
    /// is dropped.
    pub fn sender(&self) -> UnboundedSender<Notification> {
        self.sender.clone()
    }

    /// Queues a notification. Fails once the worker has stopped.
    pub fn notify(&self, notification: Notification) -> Result<(), SyncError> {
        self.sender
            .send(notification)
            .map_err(|_| SyncError::WorkerError("sync worker has stopped".to_string()))
    }

    /// Whether the worker has returned
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Closes this handle's sender and waits for the worker to handle what is queued.
    pub async fn stop(self) -> Result<SyncController<S, B>, SyncError> {
        drop(self.sender);
        self.worker
            .await
            .map_err(|e| SyncError::WorkerError(e.to_string()))?
    }
}
