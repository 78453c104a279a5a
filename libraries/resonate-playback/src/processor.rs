//! Bounded, single-flight item processor
//!
//! Submissions go through a bounded channel to one worker task, so at most
//! one item is in flight at a time. A failing item is logged and the worker
//! moves on to the next one.

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::QueueError;

/// Work performed for each submitted item
#[async_trait]
pub trait ItemHandler<T>: Send + Sync {
    async fn process(&self, item: T) -> Result<(), QueueError>;
}

/// Handle to the worker; the worker stops when this is dropped
#[derive(Debug)]
pub struct ItemProcessor<T> {
    tx: mpsc::Sender<T>,
    capacity: usize,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> ItemProcessor<T> {
    /// Spawn the worker on `runtime`
    ///
    /// The worker holds `handler` weakly and exits once it is gone.
    pub fn spawn<H>(
        runtime: &tokio::runtime::Handle,
        capacity: usize,
        inter_item_wait: Duration,
        handler: Weak<H>,
    ) -> Self
    where
        H: ItemHandler<T> + 'static,
    {
        let capacity = capacity.max(1);
        let (tx, mut rx) = mpsc::channel::<T>(capacity);

        let worker = runtime.spawn(async move {
            while let Some(item) = rx.recv().await {
                let Some(handler) = handler.upgrade() else {
                    debug!("Item handler dropped, stopping processor");
                    break;
                };
                if let Err(e) = handler.process(item).await {
                    error!("Queue item failed: {}", e);
                }
                drop(handler);

                if !inter_item_wait.is_zero() {
                    tokio::time::sleep(inter_item_wait).await;
                }
            }
            debug!("Queue processor stopped");
        });

        Self {
            tx,
            capacity,
            worker,
        }
    }

    /// Enqueue without waiting; a full channel rejects the item
    pub fn submit(&self, item: T) -> Result<(), QueueError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Saturated {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => QueueError::ProcessorClosed,
        })
    }

    /// Items waiting to be processed
    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Drop for ItemProcessor<T> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
