//! Job scheduler — runs task jobs on the tokio runtime.
//!
//! The scheduler only decides *when* a job runs. Everything about the task
//! record is the job's business; the scheduler just calls [`TaskJob::run`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::status::Status;
use crate::tasks::job::TaskJob;

/// Runs submitted jobs at some point in the future.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Queue a job. Returns its job id.
    async fn submit(&self, job: TaskJob) -> Uuid;

    /// Ask a queued or running job to cancel. Returns whether a task was
    /// forced into its canceled state.
    async fn cancel(&self, job_id: Uuid) -> bool;
}

struct TrackedJob {
    job: TaskJob,
    handle: JoinHandle<Status>,
}

/// Scheduler backed by `tokio::spawn`, running at most `max_parallel_jobs`
/// jobs at once. Jobs beyond that wait for a permit.
pub struct TokioScheduler {
    permits: Arc<Semaphore>,
    max_parallel_jobs: usize,
    jobs: Arc<RwLock<HashMap<Uuid, TrackedJob>>>,
}

impl TokioScheduler {
    pub fn new(max_parallel_jobs: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_parallel_jobs)),
            max_parallel_jobs,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get count of jobs currently holding a run permit.
    pub fn running_count(&self) -> usize {
        self.max_parallel_jobs - self.permits.available_permits()
    }

    /// Get all tracked (queued, running or unreaped) job IDs.
    pub async fn tracked_jobs(&self) -> Vec<Uuid> {
        self.jobs.read().await.keys().cloned().collect()
    }

    /// Wait for a job to finish and stop tracking it.
    ///
    /// Returns `None` for unknown jobs.
    pub async fn wait(&self, job_id: Uuid) -> Option<Status> {
        let tracked = self.jobs.write().await.remove(&job_id)?;
        match tracked.handle.await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Job runner did not complete");
                None
            }
        }
    }

    /// Cancel every tracked job and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let tracked: Vec<(Uuid, TrackedJob)> = self.jobs.write().await.drain().collect();
        info!(jobs = tracked.len(), "Shutting down scheduler");

        for (_, t) in &tracked {
            t.job.cancel().await;
        }
        for (job_id, t) in tracked {
            if let Err(e) = t.handle.await {
                warn!(job_id = %job_id, error = %e, "Job runner did not complete");
            }
        }
    }

    async fn reap_finished(&self) {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, t| !t.handle.is_finished());
        let reaped = before - jobs.len();
        if reaped > 0 {
            debug!(reaped, "Reaped finished jobs");
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn submit(&self, job: TaskJob) -> Uuid {
        self.reap_finished().await;

        let job_id = job.id();
        let permits = Arc::clone(&self.permits);
        let runner = job.clone();
        let handle = tokio::spawn(async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            runner.run().await
        });

        self.jobs
            .write()
            .await
            .insert(job_id, TrackedJob { job, handle });
        debug!(job_id = %job_id, "Job submitted");
        job_id
    }

    async fn cancel(&self, job_id: Uuid) -> bool {
        let job = match self.jobs.read().await.get(&job_id) {
            Some(t) => t.job.clone(),
            None => {
                debug!(job_id = %job_id, "Cancel for unknown job");
                return false;
            }
        };
        job.cancel().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::job::{JobConfig, TaskContext, work_fn};
    use crate::tasks::registry::TaskRegistry;
    use crate::tasks::state::JobState;
    use crate::tasks::store::TaskStore;
    use std::time::Duration;

    fn job(store: &Arc<TaskStore>, name: &str, cancelable: bool) -> TaskJob {
        TaskJob::new(
            JobConfig::new(name, "alice").cancelable(cancelable),
            Arc::clone(store) as Arc<dyn TaskRegistry>,
            work_fn(|ctx: TaskContext| async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(20)) => Status::ok("finished"),
                    _ = ctx.cancelled() => Status::canceled("stopped"),
                }
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn submitted_job_runs() {
        let store = Arc::new(TaskStore::new(10));
        let scheduler = TokioScheduler::new(2);

        let id = scheduler.submit(job(&store, "Scan", false)).await;
        let status = scheduler.wait(id).await.unwrap();
        assert_eq!(status.message(), "finished");
        assert!(scheduler.wait(id).await.is_none());

        let records = store.list_tasks("alice").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state(), JobState::Succeeded);
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let store = Arc::new(TaskStore::new(10));
        let scheduler = TokioScheduler::new(1);

        let first = scheduler.submit(job(&store, "One", false)).await;
        let second = scheduler.submit(job(&store, "Two", false)).await;
        assert!(scheduler.running_count() <= 1);

        scheduler.wait(first).await.unwrap();
        scheduler.wait(second).await.unwrap();
        assert_eq!(scheduler.running_count(), 0);
        assert_eq!(store.summary().await.succeeded, 2);
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_false() {
        let scheduler = TokioScheduler::default();
        assert!(!scheduler.cancel(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn shutdown_cancels_tracked_jobs() {
        let store = Arc::new(TaskStore::new(10));
        let scheduler = TokioScheduler::new(1);

        let slow = TaskJob::new(
            JobConfig::new("Slow", "alice").cancelable(true),
            Arc::clone(&store) as Arc<dyn TaskRegistry>,
            work_fn(|_ctx: TaskContext| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Status::ok("too late")
            }),
        )
        .unwrap();
        let handle = slow.clone();
        scheduler.submit(slow).await;

        tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
            .await
            .unwrap();
        assert!(scheduler.tracked_jobs().await.is_empty());
        assert_eq!(handle.state().await, JobState::Canceled);
    }
}
