//! Copy-on-write job collection.
//!
//! Every mutation clones the current collection, applies the change and swaps the new
//! collection in under the write lock, so readers only ever hold complete snapshots. Each
//! commit also publishes the snapshot and freshly computed statistics on a watch channel.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use super::job::{Job, JobStatus};
use super::stats::{ProcessingStats, QueueStats, StatsCalculator};

/// Immutable view of the collection plus the statistics derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    /// Incremented on every commit.
    pub version: u64,
    pub taken_at: DateTime<Utc>,
    pub jobs: Arc<Vec<Job>>,
    pub queue: QueueStats,
    pub processing: ProcessingStats,
}

struct Inner {
    version: u64,
    jobs: Arc<Vec<Job>>,
}

/// Shared job collection, kept in enqueue order.
pub struct JobStore {
    inner: RwLock<Inner>,
    stats: StatsCalculator,
    snapshot_tx: watch::Sender<Arc<PipelineSnapshot>>,
}

impl JobStore {
    pub fn new(stats: StatsCalculator) -> Self {
        let jobs = Arc::new(Vec::new());
        let (snapshot_tx, _) = watch::channel(Arc::new(build_snapshot(0, jobs.clone(), &stats)));
        Self {
            inner: RwLock::new(Inner { version: 0, jobs }),
            stats,
            snapshot_tx,
        }
    }

    /// Current collection.
    pub fn jobs(&self) -> Arc<Vec<Job>> {
        self.inner.read().jobs.clone()
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.inner.read().jobs.iter().find(|job| job.id == id).cloned()
    }

    /// Subscribe to snapshots published after each commit.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PipelineSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Snapshot with statistics computed now.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let inner = self.inner.read();
        build_snapshot(inner.version, inner.jobs.clone(), &self.stats)
    }

    /// Append a job.
    pub fn insert(&self, job: Job) {
        let mut inner = self.inner.write();
        let mut jobs = Vec::with_capacity(inner.jobs.len() + 1);
        jobs.extend(inner.jobs.iter().cloned());
        jobs.push(job);
        self.commit(&mut inner, jobs);
    }

    /// Apply `f` to a copy of the job and commit the copy if `f` returns `true`.
    ///
    /// Returns the committed job, or `None` if the job does not exist or `f` declined.
    pub fn update<F>(&self, id: &str, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut inner = self.inner.write();
        let index = inner.jobs.iter().position(|job| job.id == id)?;

        let mut updated = inner.jobs[index].clone();
        if !f(&mut updated) {
            return None;
        }

        let mut jobs: Vec<Job> = inner.jobs.as_ref().clone();
        jobs[index] = updated.clone();
        self.commit(&mut inner, jobs);
        Some(updated)
    }

    /// Keep only the jobs matching `keep`. Returns how many were removed.
    pub fn retain<F>(&self, keep: F) -> usize
    where
        F: Fn(&Job) -> bool,
    {
        let mut inner = self.inner.write();
        let jobs: Vec<Job> = inner.jobs.iter().filter(|job| keep(job)).cloned().collect();
        let removed = inner.jobs.len() - jobs.len();
        if removed > 0 {
            self.commit(&mut inner, jobs);
        }
        removed
    }

    /// Whether any job is still waiting or running.
    pub fn has_active_jobs(&self) -> bool {
        self.inner
            .read()
            .jobs
            .iter()
            .any(|job| matches!(job.status, JobStatus::Queued | JobStatus::Processing))
    }

    pub fn len(&self) -> usize {
        self.inner.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn commit(&self, inner: &mut Inner, jobs: Vec<Job>) {
        inner.version += 1;
        inner.jobs = Arc::new(jobs);
        // Published while still holding the write lock so subscribers see versions in order.
        self.snapshot_tx.send_replace(Arc::new(build_snapshot(
            inner.version,
            inner.jobs.clone(),
            &self.stats,
        )));
    }
}

fn build_snapshot(version: u64, jobs: Arc<Vec<Job>>, stats: &StatsCalculator) -> PipelineSnapshot {
    let now = Utc::now();
    PipelineSnapshot {
        version,
        taken_at: now,
        queue: stats.queue_stats(&jobs, now),
        processing: stats.processing_stats(&jobs),
        jobs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::factory::JobFactory;
    use crate::pipeline::job::AssetDescriptor;

    fn new_job(asset_id: &str) -> Job {
        JobFactory::default().create_job(&AssetDescriptor::new(asset_id, 1024, "wav"))
    }

    #[test]
    fn test_insert_preserves_order() {
        let store = JobStore::new(StatsCalculator::default());
        let a = new_job("a");
        let b = new_job("b");
        store.insert(a.clone());
        store.insert(b.clone());

        let ids: Vec<String> = store.jobs().iter().map(|job| job.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_update_replaces_collection() {
        let store = JobStore::new(StatsCalculator::default());
        let job = new_job("a");
        let id = job.id.clone();
        store.insert(job);

        let before = store.jobs();
        let updated = store
            .update(&id, |job| {
                job.status = JobStatus::Processing;
                true
            })
            .unwrap();

        assert_eq!(updated.status, JobStatus::Processing);
        // The snapshot taken before the update is untouched.
        assert_eq!(before[0].status, JobStatus::Queued);
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_declined_update_does_not_commit() {
        let store = JobStore::new(StatsCalculator::default());
        let job = new_job("a");
        let id = job.id.clone();
        store.insert(job);
        let version = store.snapshot().version;

        assert!(store.update(&id, |_| false).is_none());
        assert!(store.update("missing", |_| true).is_none());
        assert_eq!(store.snapshot().version, version);
    }

    #[test]
    fn test_retain_counts_removed() {
        let store = JobStore::new(StatsCalculator::default());
        let mut done = new_job("a");
        done.status = JobStatus::Completed;
        store.insert(done);
        store.insert(new_job("b"));

        assert_eq!(store.retain(|job| !job.is_terminal()), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.retain(|job| !job.is_terminal()), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_recomputed_stats() {
        let store = JobStore::new(StatsCalculator::default());
        let mut rx = store.subscribe();
        assert_eq!(rx.borrow().queue.total, 0);

        store.insert(new_job("a"));
        rx.changed().await.unwrap();

        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.queue.total, 1);
        assert_eq!(snapshot.queue.queued, 1);
        assert_eq!(snapshot.jobs.len(), 1);
    }
}
