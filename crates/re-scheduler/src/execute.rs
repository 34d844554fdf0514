//! Orchestrates one `Execute` call: cache lookup, validation, and dispatch
//! to a worker if nothing usable is cached.

use crate::queue::{Task, TaskQueue};
use crate::validate::{validate, ActionResultView, TreeView};
use re_cache::Cache;
use re_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unknown,
    CacheCheck,
    Executing,
    Completed,
}

/// Compute the `uploads/<uuid>/blobs/<hash>/<size>` execution id for an
/// action digest, per the action-digest-keyed upload-resource convention.
pub fn execution_id(action_hash: &str, size_bytes: i64) -> String {
    format!("uploads/{}/blobs/{action_hash}/{size_bytes}", Uuid::new_v4())
}

pub struct ExecuteRequest {
    pub instance: String,
    pub action_hash: String,
    pub action_size: i64,
    pub skip_cache_lookup: bool,
    pub max_retry: u32,
}

/// `emit` reports stage transitions as they happen (`re-server` turns
/// these into `longrunning.Operation` updates).
pub async fn execute(
    ac: Arc<dyn Cache>,
    cas: Arc<dyn Cache>,
    queue: TaskQueue,
    req: ExecuteRequest,
    emit: impl Fn(Stage) + Send + Sync,
    action_result_of: impl Fn(&[u8]) -> Result<ActionResultView> + Send + Sync,
    decode_tree: impl Fn(&[u8]) -> Result<TreeView> + Send + Sync,
) -> Result<Vec<u8>> {
    emit(Stage::Unknown);

    if !req.skip_cache_lookup {
        emit(Stage::CacheCheck);
        if let Some(cached) = ac.get(&req.action_hash).await? {
            let view = action_result_of(&cached)?;
            if validate(cas.clone(), &view, decode_tree).await.is_ok() {
                emit(Stage::Completed);
                return Ok(cached);
            }
            // Validation failed: fall through to a real execution, the
            // same as a miss.
        }
    }

    emit(Stage::Executing);
    let (tx, rx) = oneshot::channel();
    queue
        .push(Task {
            action_digest_hash: req.action_hash.clone(),
            instance: req.instance.clone(),
            max_retry: req.max_retry,
            reply: tx,
        })
        .await?;
    let result = rx
        .await
        .map_err(|_| Error::internal("dispatch loop dropped the reply channel"))??;

    ac.set(&req.action_hash, result.clone()).await?;
    emit(Stage::Completed);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::run_worker_loop;
    use crate::worker::{WorkerClient, WorkerRegistry};
    use async_trait::async_trait;
    use re_cache::tiers::memory::MemoryCache;
    use std::sync::Mutex as StdMutex;

    struct FixedClient;

    #[async_trait]
    impl WorkerClient for FixedClient {
        async fn heartbeat(&self) -> Result<String> {
            Ok("ok".to_string())
        }

        async fn execute(&self, _action_digest_hash: &str, _instance: &str) -> Result<Vec<u8>> {
            Ok(b"fresh-action-result".to_vec())
        }
    }

    fn no_op_decode(_b: &[u8]) -> Result<TreeView> {
        unreachable!("no output directories in these tests")
    }

    #[tokio::test]
    async fn cache_miss_dispatches_and_populates_ac() {
        let ac: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let registry = Arc::new(WorkerRegistry::new());
        registry
            .register("w1".to_string(), "a1".to_string(), Arc::new(FixedClient))
            .await;
        let (queue, receiver) = TaskQueue::new(8);
        let handle = tokio::spawn(run_worker_loop(queue.clone(), receiver, registry));

        let stages = Arc::new(StdMutex::new(Vec::new()));
        let stages_clone = stages.clone();

        let result = execute(
            ac.clone(),
            cas,
            queue,
            ExecuteRequest {
                instance: "".to_string(),
                action_hash: "action1".to_string(),
                action_size: 10,
                skip_cache_lookup: false,
                max_retry: 0,
            },
            move |s| stages_clone.lock().unwrap().push(s),
            |_bytes| {
                Ok(ActionResultView {
                    output_files: vec![],
                    output_directories: vec![],
                })
            },
            no_op_decode,
        )
        .await
        .unwrap();

        assert_eq!(result, b"fresh-action-result".to_vec());
        assert_eq!(ac.get("action1").await.unwrap(), Some(result));
        assert_eq!(
            *stages.lock().unwrap(),
            vec![Stage::Unknown, Stage::CacheCheck, Stage::Executing, Stage::Completed]
        );
        handle.abort();
    }

    #[tokio::test]
    async fn cache_hit_with_valid_result_skips_dispatch() {
        let ac: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        let cas: Arc<dyn Cache> = Arc::new(MemoryCache::new(1_000_000, 100_000));
        ac.set("action1", b"cached-result".to_vec()).await.unwrap();
        let registry = Arc::new(WorkerRegistry::new());
        // No workers registered: if dispatch were attempted, acquire()
        // would return None and the test would hang on the 60s backoff.
        let (queue, receiver) = TaskQueue::new(8);
        let handle = tokio::spawn(run_worker_loop(queue.clone(), receiver, registry));

        let result = execute(
            ac,
            cas,
            queue,
            ExecuteRequest {
                instance: "".to_string(),
                action_hash: "action1".to_string(),
                action_size: 10,
                skip_cache_lookup: false,
                max_retry: 0,
            },
            |_s| {},
            |_bytes| {
                Ok(ActionResultView {
                    output_files: vec![],
                    output_directories: vec![],
                })
            },
            no_op_decode,
        )
        .await
        .unwrap();

        assert_eq!(result, b"cached-result".to_vec());
        handle.abort();
    }
}
