//! Single-writer task queue.
//!
//! Every write is boxed into a job and sent over one bounded channel. A single
//! task drains the channel and awaits each job to completion before taking the
//! next one, so no two writes ever overlap. Senders wait when the queue is full.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::error::{StorageError, StorageResult};

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Handle to the write chain. Cloning shares the same queue.
#[derive(Clone)]
pub struct WriteChain {
    sender: mpsc::Sender<Job>,
}

impl WriteChain {
    /// Spawns the worker task. Must be called inside a tokio runtime.
    pub fn spawn(capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if AssertUnwindSafe(job()).catch_unwind().await.is_err() {
                    error!("Write job panicked; continuing with next job");
                }
            }
            debug!("Write chain stopped");
        });

        Self { sender }
    }

    /// Enqueues `task` and waits for its result.
    ///
    /// The task starts only after every previously enqueued task has settled,
    /// whether it succeeded or failed.
    pub async fn run<T, F, Fut>(&self, task: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StorageResult<T>> + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let result = task().await;
                // The caller may have stopped waiting.
                let _ = reply.send(result);
            }
            .boxed()
        });

        self.sender
            .send(job)
            .await
            .map_err(|_| StorageError::WriterClosed)?;

        response.await.map_err(|_| StorageError::WriterClosed)?
    }

    /// Waits until every job enqueued before this call has settled.
    pub async fn settle(&self) -> StorageResult<()> {
        self.run(|| async { Ok(()) }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_issue_order() {
        let chain = WriteChain::spawn(16);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut pending = Vec::new();
        for i in 0..10u64 {
            let log = log.clone();
            pending.push(chain.run(move || async move {
                // Earlier jobs sleep longer; order must still hold.
                tokio::time::sleep(Duration::from_millis(10 - i)).await;
                log.lock().unwrap().push(i);
                Ok(i)
            }));
        }

        let results = futures::future::join_all(pending).await;
        assert_eq!(
            results.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>(),
            (0..10).collect::<Vec<_>>()
        );
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_job_does_not_block_chain() {
        let chain = WriteChain::spawn(4);

        let failed: StorageResult<()> = chain
            .run(|| async { Err(StorageError::Constraint("dup".into())) })
            .await;
        assert!(matches!(failed, Err(StorageError::Constraint(_))));

        let ok = chain.run(|| async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn test_panicking_job_reports_closed_and_chain_survives() {
        let chain = WriteChain::spawn(4);

        let result: StorageResult<()> = chain
            .run(|| async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StorageError::WriterClosed)));

        chain.settle().await.unwrap();
        assert_eq!(chain.run(|| async { Ok("still here") }).await.unwrap(), "still here");
    }
}
