//! In-memory job cache and the per-job mutation locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rollout_core::job::Job;
use rollout_core::types::{JobId, Timestamp};
use tokio::sync::RwLock;

/// Hot copies of recently touched jobs.
///
/// The store is written before the cache, so a cached job is never ahead of
/// its durable record. When the cache grows past `capacity`, the terminal
/// job with the oldest `updated_at` is evicted; active jobs are never
/// evicted.
pub struct JobCache {
    jobs: RwLock<HashMap<JobId, Job>>,
    capacity: usize,
}

impl JobCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn put(&self, job: Job) {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job);
        while jobs.len() > self.capacity {
            let victim = jobs
                .values()
                .filter(|j| j.status.is_terminal())
                .min_by_key(|j| j.updated_at)
                .map(|j| j.id);
            match victim {
                Some(id) => {
                    jobs.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Drop terminal jobs last updated before `cutoff`. Returns their ids.
    pub async fn purge_terminal_before(&self, cutoff: Timestamp) -> Vec<JobId> {
        let mut jobs = self.jobs.write().await;
        let stale: Vec<JobId> = jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.updated_at < cutoff)
            .map(|j| j.id)
            .collect();
        for id in &stale {
            jobs.remove(id);
        }
        stale
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

/// One async mutex per job id, serialising read-modify-write sequences.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    /// The lock for `id`, created on first use.
    pub fn lock_for(&self, id: JobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    pub fn remove(&self, id: JobId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
