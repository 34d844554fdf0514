//! The worker registry: a read-write-locked map of known executors, kept
//! alive by a periodic heartbeat.

use crate::metrics::scheduler_metrics;
use async_trait::async_trait;
use re_core::constants::{BREAK_TO_BROKEN, REMOVE_AFTER_BROKEN};
use re_core::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub type WorkerId = String;

/// The RPC surface a worker exposes to the scheduler. `re-server` supplies
/// the real `tonic` client; tests supply fakes.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Returns an opaque, implementation-defined property string (worker
    /// capacity, platform, build id, ...) on success.
    async fn heartbeat(&self) -> Result<String>;

    /// Run one action on this worker, returning the marshalled
    /// `ActionResult` bytes.
    async fn execute(&self, action_digest_hash: &str, instance: &str) -> Result<Vec<u8>>;
}

pub struct WorkerEntry {
    pub addr: String,
    pub client: Arc<dyn WorkerClient>,
    pub in_use_count: Arc<AtomicU32>,
    pub consecutive_failures: u32,
    pub broken_since: Option<Instant>,
    pub property: Option<String>,
}

impl WorkerEntry {
    fn new(addr: String, client: Arc<dyn WorkerClient>) -> Self {
        Self {
            addr,
            client,
            in_use_count: Arc::new(AtomicU32::new(0)),
            consecutive_failures: 0,
            broken_since: None,
            property: None,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken_since.is_some()
    }
}

#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerEntry>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Register(id, addr)`: new id dials and inserts; same id+addr is a
    /// no-op; same id with a different addr replaces the client and resets
    /// counters.
    pub async fn register(&self, id: WorkerId, addr: String, client: Arc<dyn WorkerClient>) {
        let mut workers = self.workers.write().await;
        match workers.get(&id) {
            Some(existing) if existing.addr == addr => {}
            _ => {
                workers.insert(id, WorkerEntry::new(addr, client));
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// One heartbeat pass over every registered worker. Failures mutate
    /// the worker entry only; they never propagate to an RPC caller.
    pub async fn heartbeat_once(&self) {
        let ids: Vec<WorkerId> = self.workers.read().await.keys().cloned().collect();
        for id in ids {
            let client = {
                let workers = self.workers.read().await;
                match workers.get(&id) {
                    Some(entry) => entry.client.clone(),
                    None => continue,
                }
            };
            let outcome = client.heartbeat().await;
            let mut workers = self.workers.write().await;
            let Some(entry) = workers.get_mut(&id) else {
                continue;
            };
            match outcome {
                Ok(property) => {
                    entry.property = Some(property);
                    entry.consecutive_failures = 0;
                    entry.broken_since = None;
                }
                Err(e) => {
                    entry.consecutive_failures += 1;
                    warn!(worker = %id, error = %e, failures = entry.consecutive_failures, "worker heartbeat failed");
                    if entry.consecutive_failures >= BREAK_TO_BROKEN && entry.broken_since.is_none() {
                        entry.broken_since = Some(Instant::now());
                    }
                }
            }
        }

        let to_remove: Vec<WorkerId> = {
            let workers = self.workers.read().await;
            workers
                .iter()
                .filter(|(_, e)| {
                    e.broken_since
                        .is_some_and(|since| since.elapsed() >= REMOVE_AFTER_BROKEN)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        if !to_remove.is_empty() {
            let mut workers = self.workers.write().await;
            for id in &to_remove {
                workers.remove(id);
                info!(worker = %id, "removed worker after extended broken period");
            }
        }
    }

    /// Spawn the heartbeat loop as a background task.
    pub fn spawn_heartbeat_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(re_core::constants::HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                registry.heartbeat_once().await;
            }
        })
    }

    /// `AcquireClient`: the least-loaded non-broken worker, with its
    /// in-flight counter already incremented. The returned guard
    /// decrements it on drop.
    pub async fn acquire(&self) -> Option<(WorkerId, Arc<dyn WorkerClient>, InFlightGuard)> {
        let workers = self.workers.read().await;
        let best = workers
            .iter()
            .filter(|(_, e)| !e.is_broken())
            .min_by_key(|(_, e)| e.in_use_count.load(Ordering::SeqCst))?;
        let (id, entry) = best;
        entry.in_use_count.fetch_add(1, Ordering::SeqCst);
        scheduler_metrics().worker_in_flight.inc();
        Some((
            id.clone(),
            entry.client.clone(),
            InFlightGuard(entry.in_use_count.clone()),
        ))
    }
}

/// Decrements the worker's in-flight counter when the RPC that acquired it
/// completes or is dropped.
pub struct InFlightGuard(Arc<AtomicU32>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
        scheduler_metrics().worker_in_flight.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct FakeClient {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl WorkerClient for FakeClient {
        async fn heartbeat(&self) -> Result<String> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok("ok".to_string())
            } else {
                Err(re_core::Error::Unavailable("down".to_string()))
            }
        }

        async fn execute(&self, _action_digest_hash: &str, _instance: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn register_new_id_inserts_entry() {
        let registry = WorkerRegistry::new();
        let client = Arc::new(FakeClient {
            healthy: AtomicBool::new(true),
        });
        registry
            .register("w1".to_string(), "addr1".to_string(), client)
            .await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn register_same_id_same_addr_is_noop() {
        let registry = WorkerRegistry::new();
        let client = Arc::new(FakeClient {
            healthy: AtomicBool::new(true),
        });
        registry
            .register("w1".to_string(), "addr1".to_string(), client.clone())
            .await;
        registry
            .register("w1".to_string(), "addr1".to_string(), client)
            .await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn heartbeat_failure_increments_counter_and_eventually_breaks() {
        let registry = WorkerRegistry::new();
        let client = Arc::new(FakeClient {
            healthy: AtomicBool::new(false),
        });
        registry
            .register("w1".to_string(), "addr1".to_string(), client)
            .await;
        for _ in 0..BREAK_TO_BROKEN {
            registry.heartbeat_once().await;
        }
        let workers = registry.workers.read().await;
        assert!(workers.get("w1").unwrap().is_broken());
    }

    #[tokio::test]
    async fn acquire_skips_broken_workers() {
        let registry = WorkerRegistry::new();
        let healthy = Arc::new(FakeClient {
            healthy: AtomicBool::new(true),
        });
        let broken = Arc::new(FakeClient {
            healthy: AtomicBool::new(false),
        });
        registry
            .register("healthy".to_string(), "a1".to_string(), healthy)
            .await;
        registry
            .register("broken".to_string(), "a2".to_string(), broken)
            .await;
        for _ in 0..BREAK_TO_BROKEN {
            registry.heartbeat_once().await;
        }
        let (id, _client, _guard) = registry.acquire().await.unwrap();
        assert_eq!(id, "healthy");
    }

    #[tokio::test]
    async fn acquire_picks_least_in_flight() {
        let registry = WorkerRegistry::new();
        let a = Arc::new(FakeClient {
            healthy: AtomicBool::new(true),
        });
        let b = Arc::new(FakeClient {
            healthy: AtomicBool::new(true),
        });
        registry.register("a".to_string(), "a1".to_string(), a).await;
        registry.register("b".to_string(), "b1".to_string(), b).await;

        let (first_id, _, first_guard) = registry.acquire().await.unwrap();
        // Keep `a` (or whichever came first) busy, the other should win next.
        let (second_id, _, _second_guard) = registry.acquire().await.unwrap();
        assert_ne!(first_id, second_id);
        drop(first_guard);
    }
}
