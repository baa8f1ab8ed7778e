//! Task registry contract, the single point of truth polled by clients.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::tasks::record::TaskRecord;

/// Something that can cancel the job behind a task.
///
/// Registered with the registry at task creation so that an external
/// cancellation request can reach the running job.
#[async_trait]
pub trait TaskCanceler: Send + Sync {
    /// Cancel the job. Returns `true` if this call forced the task into its
    /// canceled state, `false` if there was nothing left to cancel.
    async fn cancel_task(&self) -> bool;
}

/// Authoritative store of task records.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Allocate and store a new running record.
    ///
    /// When a canceler is supplied the record is cancelable and the registry
    /// keeps the canceler until the record is removed.
    async fn create_task(
        &self,
        name: &str,
        user_id: &str,
        canceler: Option<Arc<dyn TaskCanceler>>,
        idempotent: bool,
    ) -> Result<TaskRecord, RegistryError>;

    /// Persist the current state of a record. Safe to call repeatedly.
    async fn update_task(&self, record: &TaskRecord) -> Result<(), RegistryError>;

    /// Current snapshot of a record owned by `user_id`.
    async fn get_task(&self, user_id: &str, task_id: Uuid) -> Result<TaskRecord, RegistryError>;

    /// All records owned by `user_id`.
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<TaskRecord>, RegistryError>;

    /// Delete a record owned by `user_id`.
    async fn remove_task(&self, user_id: &str, task_id: Uuid) -> Result<(), RegistryError>;

    /// Route a cancellation request to the record's registered canceler.
    ///
    /// Returns whether the canceler actually forced the task to stop.
    async fn cancel_task(&self, user_id: &str, task_id: Uuid) -> Result<bool, RegistryError>;
}
