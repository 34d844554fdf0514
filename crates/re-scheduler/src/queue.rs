//! The bounded FIFO task queue and the `RunWorker` dispatch loop.

use crate::metrics::scheduler_metrics;
use crate::worker::WorkerRegistry;
use re_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

pub struct Task {
    pub action_digest_hash: String,
    pub instance: String,
    pub max_retry: u32,
    pub reply: oneshot::Sender<Result<Vec<u8>>>,
}

#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<Task>,
}

impl TaskQueue {
    /// Creates the queue and returns it paired with its receiver; the
    /// receiver is consumed by [`run_worker_loop`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Task>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Enqueue `task`, blocking (applying backpressure) if the queue is
    /// full.
    pub async fn push(&self, task: Task) -> Result<()> {
        self.sender
            .send(task)
            .await
            .map_err(|_| Error::internal("task queue is closed"))?;
        scheduler_metrics().queue_depth.inc();
        Ok(())
    }
}

/// Runs the dispatch loop until the queue's sender side is dropped.
/// Ground truth for retry: a failed `Execute` with `max_retry > 0` is
/// requeued with `max_retry` decremented; at `max_retry == 0` the caller
/// is told the attempt was exhausted.
pub async fn run_worker_loop(queue: TaskQueue, mut receiver: mpsc::Receiver<Task>, registry: Arc<WorkerRegistry>) {
    while let Some(mut task) = receiver.recv().await {
        scheduler_metrics().queue_depth.dec();
        let Some((worker_id, client, _guard)) = registry.acquire().await else {
            warn!("no available worker, backing off");
            tokio::time::sleep(re_core::constants::NO_WORKER_BACKOFF).await;
            if queue.push(task).await.is_err() {
                break;
            }
            continue;
        };

        let result = client.execute(&task.action_digest_hash, &task.instance).await;
        match result {
            Ok(bytes) => {
                let _ = task.reply.send(Ok(bytes));
            }
            Err(e) if task.max_retry > 0 => {
                warn!(worker = %worker_id, error = %e, remaining = task.max_retry - 1, "execute failed, retrying");
                task.max_retry -= 1;
                if queue.push(task).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(worker = %worker_id, error = %e, "execute failed, retries exhausted");
                let _ = task
                    .reply
                    .send(Err(Error::Internal(format!("retry-exhausted: {e}"))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerClient;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingClient {
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl WorkerClient for CountingClient {
        async fn heartbeat(&self) -> Result<String> {
            Ok("ok".to_string())
        }

        async fn execute(&self, _action_digest_hash: &str, _instance: &str) -> Result<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(Error::Internal("synthetic failure".to_string()))
            } else {
                Ok(b"result".to_vec())
            }
        }
    }

    #[tokio::test]
    async fn successful_execute_replies_with_result() {
        let registry = Arc::new(WorkerRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register(
                "w1".to_string(),
                "a1".to_string(),
                Arc::new(CountingClient {
                    calls: calls.clone(),
                    fail_first_n: 0,
                }),
            )
            .await;

        let (queue, receiver) = TaskQueue::new(8);
        let loop_handle = tokio::spawn(run_worker_loop(queue.clone(), receiver, registry));

        let (tx, rx) = oneshot::channel();
        queue
            .push(Task {
                action_digest_hash: "abc".to_string(),
                instance: "".to_string(),
                max_retry: 0,
                reply: tx,
            })
            .await
            .unwrap();
        let result = rx.await.unwrap();
        assert_eq!(result.unwrap(), b"result".to_vec());
        loop_handle.abort();
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let registry = Arc::new(WorkerRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register(
                "w1".to_string(),
                "a1".to_string(),
                Arc::new(CountingClient {
                    calls: calls.clone(),
                    fail_first_n: 2,
                }),
            )
            .await;

        let (queue, receiver) = TaskQueue::new(8);
        let loop_handle = tokio::spawn(run_worker_loop(queue.clone(), receiver, registry));

        let (tx, rx) = oneshot::channel();
        queue
            .push(Task {
                action_digest_hash: "abc".to_string(),
                instance: "".to_string(),
                max_retry: 5,
                reply: tx,
            })
            .await
            .unwrap();
        let result = rx.await.unwrap();
        assert_eq!(result.unwrap(), b"result".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        loop_handle.abort();
    }

    #[tokio::test]
    async fn exhausted_retries_report_error() {
        let registry = Arc::new(WorkerRegistry::new());
        registry
            .register(
                "w1".to_string(),
                "a1".to_string(),
                Arc::new(CountingClient {
                    calls: Arc::new(AtomicU32::new(0)),
                    fail_first_n: 100,
                }),
            )
            .await;

        let (queue, receiver) = TaskQueue::new(8);
        let loop_handle = tokio::spawn(run_worker_loop(queue.clone(), receiver, registry));

        let (tx, rx) = oneshot::channel();
        queue
            .push(Task {
                action_digest_hash: "abc".to_string(),
                instance: "".to_string(),
                max_retry: 0,
                reply: tx,
            })
            .await
            .unwrap();
        let result = rx.await.unwrap();
        assert!(result.is_err());
        loop_handle.abort();
    }
}
