//! In-memory task registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::tasks::record::TaskRecord;
use crate::tasks::registry::{TaskCanceler, TaskRegistry};
use crate::tasks::state::JobState;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

struct StoredTask {
    record: TaskRecord,
    canceler: Option<Arc<dyn TaskCanceler>>,
}

/// Keeps task records for all users in memory.
///
/// Every stored create/update is also broadcast, so a poller can subscribe
/// instead of polling.
pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, StoredTask>>,
    /// Maximum concurrently running records.
    max_running: usize,
    tx: broadcast::Sender<TaskRecord>,
}

impl TaskStore {
    /// Create a new store that allows at most `max_running` running records.
    pub fn new(max_running: usize) -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            tasks: RwLock::new(HashMap::new()),
            max_running,
            tx,
        }
    }

    /// Subscribe to every record snapshot the store accepts.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskRecord> {
        self.tx.subscribe()
    }

    /// Get count of running records.
    pub async fn running_count(&self) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.record.is_running())
            .count()
    }

    /// Remove finished records that completed at least `max_age` ago.
    /// Returns the number of records removed.
    pub async fn prune_finished(&self, max_age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| match t.record.completed_at() {
            Some(completed) => completed > cutoff,
            None => true,
        });
        let removed = before - tasks.len();

        if removed > 0 {
            info!(removed, "Pruned finished tasks");
        }
        removed
    }

    /// Get summary of all records.
    pub async fn summary(&self) -> StoreSummary {
        let tasks = self.tasks.read().await;

        let mut summary = StoreSummary::default();
        for task in tasks.values() {
            match task.record.state() {
                JobState::NotStarted | JobState::Running => summary.running += 1,
                JobState::Succeeded => summary.succeeded += 1,
                JobState::Failed => summary.failed += 1,
                JobState::Canceled => summary.canceled += 1,
            }
        }

        summary.total = tasks.len();
        summary
    }

    fn owned<'a>(
        tasks: &'a HashMap<Uuid, StoredTask>,
        user_id: &str,
        task_id: Uuid,
    ) -> Result<&'a StoredTask, RegistryError> {
        let stored = tasks
            .get(&task_id)
            .ok_or(RegistryError::NotFound { task_id })?;
        if stored.record.user_id() != user_id {
            return Err(RegistryError::NotOwner {
                task_id,
                user_id: user_id.to_string(),
            });
        }
        Ok(stored)
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl TaskRegistry for TaskStore {
    async fn create_task(
        &self,
        name: &str,
        user_id: &str,
        canceler: Option<Arc<dyn TaskCanceler>>,
        idempotent: bool,
    ) -> Result<TaskRecord, RegistryError> {
        let mut tasks = self.tasks.write().await;
        let running = tasks.values().filter(|t| t.record.is_running()).count();
        if running >= self.max_running {
            return Err(RegistryError::CapacityExceeded {
                max: self.max_running,
            });
        }

        let record = TaskRecord::new(name, user_id, idempotent, canceler.is_some());
        tasks.insert(
            record.task_id(),
            StoredTask {
                record: record.clone(),
                canceler,
            },
        );
        drop(tasks);

        info!(
            task_id = %record.task_id(),
            user_id = %user_id,
            name = %name,
            cancelable = record.cancelable(),
            "Task created"
        );
        let _ = self.tx.send(record.clone());
        Ok(record)
    }

    async fn update_task(&self, record: &TaskRecord) -> Result<(), RegistryError> {
        let task_id = record.task_id();
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(&task_id)
            .ok_or(RegistryError::NotFound { task_id })?;

        if stored.record.user_id() != record.user_id() {
            return Err(RegistryError::NotOwner {
                task_id,
                user_id: record.user_id().to_string(),
            });
        }

        if !stored.record.is_running() && stored.record.result() != record.result() {
            warn!(task_id = %task_id, "Ignoring update that would rewrite a finished task");
            return Ok(());
        }

        stored.record = record.clone();
        drop(tasks);

        debug!(
            task_id = %task_id,
            running = record.is_running(),
            message = %record.message(),
            "Task updated"
        );
        let _ = self.tx.send(record.clone());
        Ok(())
    }

    async fn get_task(&self, user_id: &str, task_id: Uuid) -> Result<TaskRecord, RegistryError> {
        let tasks = self.tasks.read().await;
        Self::owned(&tasks, user_id, task_id).map(|t| t.record.clone())
    }

    async fn list_tasks(&self, user_id: &str) -> Result<Vec<TaskRecord>, RegistryError> {
        let mut records: Vec<TaskRecord> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.record.user_id() == user_id)
            .map(|t| t.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at());
        Ok(records)
    }

    async fn remove_task(&self, user_id: &str, task_id: Uuid) -> Result<(), RegistryError> {
        let mut tasks = self.tasks.write().await;
        Self::owned(&tasks, user_id, task_id)?;
        tasks.remove(&task_id);

        info!(task_id = %task_id, user_id = %user_id, "Task removed");
        Ok(())
    }

    async fn cancel_task(&self, user_id: &str, task_id: Uuid) -> Result<bool, RegistryError> {
        // The canceler updates this store, so the lock must be released first.
        let canceler = {
            let tasks = self.tasks.read().await;
            Self::owned(&tasks, user_id, task_id)?
                .canceler
                .clone()
                .ok_or(RegistryError::NotCancelable { task_id })?
        };

        info!(task_id = %task_id, user_id = %user_id, "Cancellation requested");
        Ok(canceler.cancel_task().await)
    }
}

/// Summary of all stored records.
#[derive(Debug, Default)]
pub struct StoreSummary {
    pub total: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
}

/// Spawn a background task that prunes finished records every `interval`.
pub fn spawn_expiry_task(
    store: Arc<TaskStore>,
    interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            store.prune_finished(max_age).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCanceler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskCanceler for CountingCanceler {
        async fn cancel_task(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = TaskStore::new(5);
        let record = store.create_task("Scan", "alice", None, true).await.unwrap();

        let fetched = store.get_task("alice", record.task_id()).await.unwrap();
        assert_eq!(fetched.name(), "Scan");
        assert!(fetched.is_running());
        assert!(fetched.idempotent());
        assert!(!fetched.cancelable());
    }

    #[tokio::test]
    async fn canceler_makes_record_cancelable() {
        let store = TaskStore::new(5);
        let canceler: Arc<dyn TaskCanceler> = Arc::new(CountingCanceler::default());
        let record = store
            .create_task("Scan", "alice", Some(canceler), false)
            .await
            .unwrap();
        assert!(record.cancelable());
    }

    #[tokio::test]
    async fn other_users_cannot_read_or_remove() {
        let store = TaskStore::new(5);
        let record = store.create_task("Scan", "alice", None, false).await.unwrap();
        let id = record.task_id();

        assert!(matches!(
            store.get_task("mallory", id).await,
            Err(RegistryError::NotOwner { .. })
        ));
        assert!(matches!(
            store.remove_task("mallory", id).await,
            Err(RegistryError::NotOwner { .. })
        ));
        assert!(store.get_task("alice", id).await.is_ok());
    }

    #[tokio::test]
    async fn remove_task() {
        let store = TaskStore::new(5);
        let record = store.create_task("Scan", "alice", None, false).await.unwrap();
        let id = record.task_id();

        store.remove_task("alice", id).await.unwrap();
        assert!(matches!(
            store.get_task("alice", id).await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(matches!(
            store.remove_task("alice", id).await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn running_limit() {
        let store = TaskStore::new(2);
        let first = store.create_task("One", "u", None, false).await.unwrap();
        store.create_task("Two", "u", None, false).await.unwrap();

        let result = store.create_task("Three", "u", None, false).await;
        assert!(matches!(result, Err(RegistryError::CapacityExceeded { max: 2 })));

        // finishing one frees a slot
        let mut done = first.clone();
        done.done(Status::ok("ok"), None);
        store.update_task(&done).await.unwrap();
        assert!(store.create_task("Three", "u", None, false).await.is_ok());
    }

    #[tokio::test]
    async fn update_is_repeatable_and_finished_result_sticks() {
        let store = TaskStore::new(5);
        let mut record = store.create_task("Scan", "alice", None, false).await.unwrap();

        record.set_message("halfway");
        store.update_task(&record).await.unwrap();
        store.update_task(&record).await.unwrap();
        assert_eq!(
            store.get_task("alice", record.task_id()).await.unwrap().message(),
            "halfway"
        );

        let mut finished = record.clone();
        finished.done(Status::ok("done"), None);
        store.update_task(&finished).await.unwrap();

        // a stale running snapshot must not resurrect the task
        store.update_task(&record).await.unwrap();
        let stored = store.get_task("alice", record.task_id()).await.unwrap();
        assert!(!stored.is_running());
        assert_eq!(stored.result().unwrap().message(), "done");
    }

    #[tokio::test]
    async fn update_unknown_task_fails() {
        let store = TaskStore::new(5);
        let record = TaskRecord::new("Ghost", "alice", false, false);
        assert!(matches!(
            store.update_task(&record).await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_routes_to_canceler() {
        let store = TaskStore::new(5);
        let canceler = Arc::new(CountingCanceler::default());
        let record = store
            .create_task("Scan", "alice", Some(canceler.clone() as Arc<dyn TaskCanceler>), false)
            .await
            .unwrap();

        assert!(store.cancel_task("alice", record.task_id()).await.unwrap());
        assert_eq!(canceler.calls.load(Ordering::SeqCst), 1);

        assert!(matches!(
            store.cancel_task("bob", record.task_id()).await,
            Err(RegistryError::NotOwner { .. })
        ));
        assert_eq!(canceler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_without_canceler_fails() {
        let store = TaskStore::new(5);
        let record = store.create_task("Scan", "alice", None, false).await.unwrap();
        assert!(matches!(
            store.cancel_task("alice", record.task_id()).await,
            Err(RegistryError::NotCancelable { .. })
        ));
    }

    #[tokio::test]
    async fn list_tasks_per_user() {
        let store = TaskStore::new(5);
        store.create_task("A", "alice", None, false).await.unwrap();
        store.create_task("B", "alice", None, false).await.unwrap();
        store.create_task("C", "bob", None, false).await.unwrap();

        let names: Vec<String> = store
            .list_tasks("alice")
            .await
            .unwrap()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"A".to_string()));
        assert!(names.contains(&"B".to_string()));
    }

    #[tokio::test]
    async fn prune_removes_only_finished() {
        let store = TaskStore::new(5);
        let running = store.create_task("Run", "u", None, false).await.unwrap();
        let mut finished = store.create_task("Fin", "u", None, false).await.unwrap();
        finished.done(Status::error(500, "nope"), None);
        store.update_task(&finished).await.unwrap();

        assert_eq!(store.prune_finished(Duration::from_secs(3600)).await, 0);
        assert_eq!(store.prune_finished(Duration::ZERO).await, 1);

        assert!(store.get_task("u", running.task_id()).await.is_ok());
        assert!(store.get_task("u", finished.task_id()).await.is_err());
    }

    #[tokio::test]
    async fn summary_counts_states() {
        let store = TaskStore::new(5);
        store.create_task("Run", "u", None, false).await.unwrap();
        let mut canceled = store.create_task("Stop", "u", None, false).await.unwrap();
        canceled.done(Status::canceled("Task was canceled."), None);
        store.update_task(&canceled).await.unwrap();

        let summary = store.summary().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.canceled, 1);
        assert_eq!(store.running_count().await, 1);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let store = TaskStore::new(5);
        let mut rx = store.subscribe();

        let mut record = store.create_task("Scan", "u", None, false).await.unwrap();
        record.set_message("step 1");
        store.update_task(&record).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().message(), "");
        assert_eq!(rx.recv().await.unwrap().message(), "step 1");
    }
}
