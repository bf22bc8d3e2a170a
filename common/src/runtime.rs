use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore};
use tracing::warn;

/// Capacity of a named worker pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolSpec {
    pub workers: usize,
    pub queue: usize,
}

/// Owns the named pools the platform runs its concurrent work on. Built
/// once at startup and handed to the components that need bounded
/// concurrency; nothing creates executors ad hoc.
pub struct Runtime {
    pub ingestion: WorkerPool,
    pub subtasks: WorkerPool,
    pub tools: Arc<FairPool>,
}

impl Runtime {
    pub fn new(ingestion: PoolSpec, subtask_workers: usize, tool_workers: usize) -> Self {
        Self {
            ingestion: WorkerPool::new("ingestion", ingestion.workers, ingestion.queue),
            subtasks: WorkerPool::new("subtasks", subtask_workers, usize::MAX),
            tools: Arc::new(FairPool::new(tool_workers)),
        }
    }

    /// Pool sizes from §5: ingestion 10 workers / queue 1000, subtask pool
    /// CPU x 2, tool pool 10 shared workers.
    pub fn with_defaults() -> Self {
        let cpus = std::thread::available_parallelism().map_or(4, |n| n.get());
        Self::new(
            PoolSpec {
                workers: 10,
                queue: 1000,
            },
            cpus.saturating_mul(2),
            10,
        )
    }
}

/// Bounded worker pool with a caller-runs overflow policy: when the queue
/// is saturated the submitted future runs on the caller instead of being
/// dropped, pushing back on the producer.
pub struct WorkerPool {
    name: &'static str,
    permits: Arc<Semaphore>,
    queue_slots: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, workers: usize, queue: usize) -> Self {
        Self {
            name,
            permits: Arc::new(Semaphore::new(workers)),
            queue_slots: Arc::new(Semaphore::new(queue.min(Semaphore::MAX_PERMITS))),
        }
    }

    /// Runs `fut` under a worker permit. Saturation of the queue degrades
    /// to running on the caller (caller-runs), never to dropping work.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let Ok(slot) = Arc::clone(&self.queue_slots).try_acquire_owned() else {
            warn!(pool = self.name, "pool queue saturated; running on caller");
            return fut.await;
        };

        #[allow(clippy::expect_used)]
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("pool semaphore closed");
        let out = fut.await;
        drop(permit);
        drop(slot);
        out
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Shared pool with per-tenant fair queueing: while other tenants are
/// waiting, no single tenant may hold more than a quarter of the slots.
pub struct FairPool {
    total: usize,
    max_share: usize,
    state: Mutex<FairState>,
    released: Notify,
}

#[derive(Default)]
struct FairState {
    active: HashMap<String, usize>,
    in_flight: usize,
    waiting: HashMap<String, usize>,
}

impl FairPool {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            max_share: (total / 4).max(1),
            state: Mutex::new(FairState::default()),
            released: Notify::new(),
        }
    }

    /// Acquires a slot for `tenant_id`, waiting while the pool is full or
    /// the tenant is at its contended share cap.
    pub async fn acquire(self: &Arc<Self>, tenant_id: &str) -> FairPermit {
        loop {
            // Register interest before the admissibility check so a release
            // racing with the check cannot be missed.
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                #[allow(clippy::expect_used)]
                let mut state = self.state.lock().expect("fair pool mutex poisoned");
                if self.admissible(&state, tenant_id) {
                    state.in_flight = state.in_flight.saturating_add(1);
                    *state.active.entry(tenant_id.to_owned()).or_default() += 1;
                    return FairPermit {
                        pool: Arc::clone(self),
                        tenant_id: tenant_id.to_owned(),
                    };
                }
                *state.waiting.entry(tenant_id.to_owned()).or_default() += 1;
            }

            released.await;

            {
                #[allow(clippy::expect_used)]
                let mut state = self.state.lock().expect("fair pool mutex poisoned");
                if let Some(count) = state.waiting.get_mut(tenant_id) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        state.waiting.remove(tenant_id);
                    }
                }
            }
        }
    }

    fn admissible(&self, state: &FairState, tenant_id: &str) -> bool {
        if state.in_flight >= self.total {
            return false;
        }
        let held = state.active.get(tenant_id).copied().unwrap_or(0);
        let others_waiting = state
            .waiting
            .iter()
            .any(|(waiter, count)| waiter != tenant_id && *count > 0);
        !(others_waiting && held >= self.max_share)
    }

    pub fn in_flight(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.state.lock().expect("fair pool mutex poisoned").in_flight
    }

    fn release(&self, tenant_id: &str) {
        {
            #[allow(clippy::expect_used)]
            let mut state = self.state.lock().expect("fair pool mutex poisoned");
            state.in_flight = state.in_flight.saturating_sub(1);
            if let Some(held) = state.active.get_mut(tenant_id) {
                *held = held.saturating_sub(1);
                if *held == 0 {
                    state.active.remove(tenant_id);
                }
            }
        }
        self.released.notify_waiters();
    }
}

/// Slot held by a tenant in a [`FairPool`]; released on drop.
pub struct FairPermit {
    pool: Arc<FairPool>,
    tenant_id: String,
}

impl Drop for FairPermit {
    fn drop(&mut self) {
        self.pool.release(&self.tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn worker_pool_bounds_concurrency() {
        let pool = Arc::new(WorkerPool::new("test", 2, 100));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(async {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked");
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "worker cap exceeded");
    }

    #[tokio::test]
    async fn worker_pool_runs_on_caller_when_queue_full() {
        // Queue of zero: every submission degrades to caller-runs and the
        // work still completes.
        let pool = WorkerPool::new("test", 1, 0);
        let out = pool.run(async { 41 + 1 }).await;
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn fair_pool_caps_tenant_share_under_contention() {
        let pool = Arc::new(FairPool::new(4));

        // Tenant A grabs its contended maximum (25% of 4 = 1 slot held when
        // someone else is waiting). Fill the pool with A first.
        let a1 = pool.acquire("tenant-a").await;
        let _a2 = pool.acquire("tenant-a").await;
        let _a3 = pool.acquire("tenant-a").await;
        let _a4 = pool.acquire("tenant-a").await;
        assert_eq!(pool.in_flight(), 4);

        // B queues up; A's next acquire must not jump ahead of B.
        let pool_b = Arc::clone(&pool);
        let b_task = tokio::spawn(async move {
            let _b = pool_b.acquire("tenant-b").await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let pool_a = Arc::clone(&pool);
        let a_task = tokio::spawn(async move {
            let _a = pool_a.acquire("tenant-a").await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Release one A slot: B (the other tenant) gets through, A is still
        // above the contended share and keeps waiting until B releases.
        drop(a1);
        tokio::time::timeout(Duration::from_secs(1), b_task)
            .await
            .expect("tenant-b should be admitted")
            .expect("tenant-b task panicked");

        tokio::time::timeout(Duration::from_secs(1), a_task)
            .await
            .expect("tenant-a admitted after the pool drains")
            .expect("tenant-a task panicked");
    }
}
