//! Task jobs run one unit of work and drive its task record to a terminal state.
//!
//! A [`TaskJob`] owns the bookkeeping for exactly one [`TaskRecord`]:
//!
//! 1. `run` (or an earlier explicit `start_task`) asks the registry for a record,
//!    registering a canceler when the job is cancelable, and publishes the
//!    initial message.
//! 2. The [`TaskWork`] runs on its own tokio task and may publish progress
//!    through its [`TaskContext`].
//! 3. The returned [`Status`] becomes the record's terminal result, pushed to
//!    the registry once. Panics in the work become a failed status.
//! 4. Cleanup releases the registry handle the job bound for itself.
//!
//! Start, finish, cancel and cleanup all run under one per-job mutex, so only
//! one of them can move the record to its terminal state.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::status::{DetailedCause, HTTP_INTERNAL_SERVER_ERROR, Status};
use crate::tasks::record::TaskRecord;
use crate::tasks::registry::{TaskCanceler, TaskRegistry};
use crate::tasks::state::JobState;

/// Message a successful task ends with unless the job sets its own.
pub const DEFAULT_FINAL_MESSAGE: &str = "Done";
/// Message of the status forced onto a canceled task.
pub const CANCELED_MESSAGE: &str = "Task was canceled.";
/// Message used when cleanup finds a task that never got a result.
pub const UNKNOWN_STATUS_MESSAGE: &str = "Task finished with unknown status.";
/// Message used when the work panics.
pub const UNEXPECTED_FAILURE_MESSAGE: &str = "Task failed unexpectedly.";

/// Immutable description of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// Operation name shown to users. Must not be empty.
    pub name: String,
    /// User on whose behalf the task runs.
    pub user_id: String,
    /// Published before the work starts, when non-empty.
    pub initial_message: String,
    /// Final message for a successful run; `Done` when unset.
    pub final_message: Option<String>,
    /// Whether clients may safely repeat the triggering request.
    pub idempotent: bool,
    /// Whether the task accepts cancellation requests.
    pub cancelable: bool,
}

impl JobConfig {
    /// Non-idempotent, non-cancelable job with no initial message.
    pub fn new(name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user_id: user_id.into(),
            initial_message: String::new(),
            final_message: None,
            idempotent: false,
            cancelable: false,
        }
    }

    pub fn with_initial_message(mut self, message: impl Into<String>) -> Self {
        self.initial_message = message.into();
        self
    }

    pub fn with_final_message(mut self, message: impl Into<String>) -> Self {
        self.final_message = Some(message.into());
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn cancelable(mut self, cancelable: bool) -> Self {
        self.cancelable = cancelable;
        self
    }
}

/// The unit of work a job tracks.
#[async_trait]
pub trait TaskWork: Send + Sync + 'static {
    /// Do the work and describe the outcome. Always yields a status.
    async fn perform(&self, ctx: TaskContext) -> Status;
}

/// [`TaskWork`] built from an async closure. See [`work_fn`].
pub struct WorkFn<F>(F);

/// Wrap an async closure as [`TaskWork`].
pub fn work_fn<F, Fut>(f: F) -> WorkFn<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Status> + Send + 'static,
{
    WorkFn(f)
}

#[async_trait]
impl<F, Fut> TaskWork for WorkFn<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Status> + Send + 'static,
{
    async fn perform(&self, ctx: TaskContext) -> Status {
        (self.0)(ctx).await
    }
}

/// Mutable bookkeeping, only touched under the job mutex.
struct JobBook {
    state: JobState,
    launched: bool,
    record: Option<TaskRecord>,
    /// Bound on first use, released by cleanup.
    registry: Option<Arc<dyn TaskRegistry>>,
    message: String,
    final_message: Option<String>,
    final_location: Option<String>,
    real_result: Option<Status>,
}

struct JobShared {
    job_id: Uuid,
    config: JobConfig,
    registry_source: Arc<dyn TaskRegistry>,
    token: CancellationToken,
    book: Mutex<JobBook>,
}

impl JobShared {
    fn registry(&self, book: &mut JobBook) -> Arc<dyn TaskRegistry> {
        let registry = book.registry.get_or_insert_with(|| {
            debug!(job = %self.config.name, "Bound task registry");
            Arc::clone(&self.registry_source)
        });
        Arc::clone(registry)
    }

    fn transition(&self, book: &mut JobBook, target: JobState) {
        if book.state.can_transition_to(target) {
            book.state = target;
        } else {
            debug!(
                job = %self.config.name,
                from = %book.state,
                to = %target,
                "Ignoring job state transition"
            );
        }
    }

    /// Push the in-memory record to the registry. Failures are logged.
    async fn push(&self, book: &mut JobBook) {
        let registry = self.registry(book);
        let Some(record) = book.record.as_ref() else {
            return;
        };
        if let Err(e) = registry.update_task(record).await {
            warn!(
                job = %self.config.name,
                task_id = %record.task_id(),
                error = %e,
                "Failed to update task"
            );
        }
    }

    async fn start(self: &Arc<Self>, book: &mut JobBook) -> Result<TaskRecord, JobError> {
        if book.state != JobState::NotStarted {
            return Err(JobError::AlreadyStarted {
                name: self.config.name.clone(),
            });
        }

        let registry = self.registry(book);
        let canceler = if self.config.cancelable {
            Some(Arc::new(JobCanceler {
                shared: Arc::downgrade(self),
            }) as Arc<dyn TaskCanceler>)
        } else {
            None
        };
        let mut record = registry
            .create_task(
                &self.config.name,
                &self.config.user_id,
                canceler,
                self.config.idempotent,
            )
            .await?;

        let has_message = !book.message.is_empty();
        if has_message {
            record.set_message(book.message.clone());
        }
        book.record = Some(record.clone());
        self.transition(book, JobState::Running);
        if has_message {
            self.push(book).await;
        }

        info!(
            job = %self.config.name,
            task_id = %record.task_id(),
            user_id = %self.config.user_id,
            "Task started"
        );

        // the work may already have finished if the record was created late
        if let Some(result) = book.real_result.clone() {
            self.finish(book, result).await;
            return Ok(book.record.clone().unwrap_or(record));
        }
        Ok(record)
    }

    /// Move the record to its terminal state. No-op once it has one.
    async fn finish(&self, book: &mut JobBook, result: Status) -> bool {
        let final_message = book
            .final_message
            .clone()
            .unwrap_or_else(|| DEFAULT_FINAL_MESSAGE.to_string());
        let location = book.final_location.clone();

        let Some(record) = book.record.as_mut() else {
            return false;
        };
        if !record.is_running() {
            debug!(
                job = %self.config.name,
                task_id = %record.task_id(),
                "Task already finished, keeping its result"
            );
            return false;
        }

        let task_id = record.task_id();
        if result.is_ok() {
            record.done(result.clone(), location);
            // after the result, so pollers see the final message with it
            record.set_message(final_message);
        } else {
            record.done(result.clone(), None);
            // failures replace the last progress message with the result's, so
            // clients that only read Message still learn what went wrong
            record.set_message(result.message());
        }

        self.transition(book, JobState::terminal_for(result.severity()));
        self.push(book).await;

        info!(
            job = %self.config.name,
            task_id = %task_id,
            state = %book.state,
            http_code = result.http_code(),
            "Task finished"
        );
        true
    }

    async fn cleanup(&self, book: &mut JobBook) {
        if book.record.as_ref().is_some_and(|r| r.is_running()) {
            let fallback = book.real_result.clone().unwrap_or_else(|| {
                Status::error(HTTP_INTERNAL_SERVER_ERROR, UNKNOWN_STATUS_MESSAGE)
            });
            warn!(job = %self.config.name, "Task still running at cleanup");
            self.finish(book, fallback).await;
        }
        if book.registry.take().is_some() {
            debug!(job = %self.config.name, "Released task registry");
        }
    }

    async fn cancel(&self) -> bool {
        if !self.config.cancelable {
            debug!(job = %self.config.name, "Job is not cancelable, ignoring cancel");
            return false;
        }
        // force the record before the run path can observe the token
        let mut book = self.book.lock().await;
        let forced = match book.record.as_mut() {
            Some(record) if record.is_running() => {
                record.done(Status::canceled(CANCELED_MESSAGE), None);
                record.set_message(CANCELED_MESSAGE);
                true
            }
            _ => false,
        };

        if forced {
            self.transition(&mut book, JobState::Canceled);
            self.push(&mut book).await;
            info!(job = %self.config.name, "Task canceled");
        }
        self.token.cancel();
        self.cleanup(&mut book).await;
        forced
    }
}

/// Registered with the registry for cancelable jobs.
///
/// Holds the job weakly so the registry never keeps a finished job alive.
struct JobCanceler {
    shared: Weak<JobShared>,
}

#[async_trait]
impl TaskCanceler for JobCanceler {
    async fn cancel_task(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.cancel().await,
            None => false,
        }
    }
}

/// Handle the work uses to report progress and observe cancellation.
#[derive(Clone)]
pub struct TaskContext {
    shared: Arc<JobShared>,
}

impl TaskContext {
    pub fn job_name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn user_id(&self) -> &str {
        &self.shared.config.user_id
    }

    /// Id of the task record, once it exists.
    pub async fn task_id(&self) -> Option<Uuid> {
        self.shared
            .book
            .lock()
            .await
            .record
            .as_ref()
            .map(|r| r.task_id())
    }

    /// Publish a progress message. Ignored by the registry once the task is
    /// finished.
    pub async fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        let mut book = self.shared.book.lock().await;
        book.message = message.clone();

        let publish = match book.record.as_mut() {
            Some(record) if record.is_running() => {
                record.set_message(message);
                true
            }
            _ => false,
        };
        if publish {
            self.shared.push(&mut book).await;
        }
    }

    /// Message the task ends with if the work succeeds.
    pub async fn set_final_message(&self, message: impl Into<String>) {
        self.shared.book.lock().await.final_message = Some(message.into());
    }

    /// Location of the resource a successful run produced.
    pub async fn set_final_location(&self, location: impl Into<String>) {
        self.shared.book.lock().await.final_location = Some(location.into());
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.shared.token.cancelled().await
    }
}

/// Orchestrates one unit of work against the task registry.
///
/// Cheap to clone; clones share the same job.
#[derive(Clone)]
pub struct TaskJob {
    shared: Arc<JobShared>,
    work: Arc<dyn TaskWork>,
}

impl TaskJob {
    pub fn new(
        config: JobConfig,
        registry: Arc<dyn TaskRegistry>,
        work: impl TaskWork,
    ) -> Result<Self, JobError> {
        if config.name.trim().is_empty() {
            return Err(JobError::EmptyName);
        }

        let book = JobBook {
            state: JobState::NotStarted,
            launched: false,
            record: None,
            registry: None,
            message: config.initial_message.clone(),
            final_message: config.final_message.clone(),
            final_location: None,
            real_result: None,
        };

        Ok(Self {
            shared: Arc::new(JobShared {
                job_id: Uuid::new_v4(),
                config,
                registry_source: registry,
                token: CancellationToken::new(),
                book: Mutex::new(book),
            }),
            work: Arc::new(work),
        })
    }

    /// Scheduler-side identity of the job (not the task id).
    pub fn id(&self) -> Uuid {
        self.shared.job_id
    }

    pub fn config(&self) -> &JobConfig {
        &self.shared.config
    }

    pub async fn state(&self) -> JobState {
        self.shared.book.lock().await.state
    }

    /// Snapshot of the job's own copy of its record.
    pub async fn record(&self) -> Option<TaskRecord> {
        self.shared.book.lock().await.record.clone()
    }

    /// The status the work produced, once known.
    pub async fn real_result(&self) -> Option<Status> {
        self.shared.book.lock().await.real_result.clone()
    }

    pub async fn final_location(&self) -> Option<String> {
        self.shared.book.lock().await.final_location.clone()
    }

    /// `{"Location"?, "Message"}` describing a successful outcome.
    pub async fn final_result(&self) -> Value {
        let book = self.shared.book.lock().await;
        let mut object = Map::new();
        if let Some(location) = &book.final_location {
            object.insert("Location".to_string(), Value::from(location.clone()));
        }
        let message = book.final_message.as_deref().unwrap_or(DEFAULT_FINAL_MESSAGE);
        object.insert("Message".to_string(), Value::from(message));
        Value::Object(object)
    }

    /// Create the task record now, e.g. to hand its id to the client before
    /// the scheduler gets to the job.
    pub async fn start_task(&self) -> Result<TaskRecord, JobError> {
        let mut book = self.shared.book.lock().await;
        self.shared.start(&mut book).await
    }

    /// Cancel the job. A no-op returning `false` for non-cancelable jobs and
    /// for tasks that already finished.
    pub async fn cancel(&self) -> bool {
        self.shared.cancel().await
    }

    /// Remove this job's record from the registry. Failures are logged.
    pub async fn remove_task(&self) {
        let book = self.shared.book.lock().await;
        let Some(record) = book.record.as_ref() else {
            return;
        };
        if let Err(e) = self
            .shared
            .registry_source
            .remove_task(record.user_id(), record.task_id())
            .await
        {
            warn!(
                job = %self.shared.config.name,
                task_id = %record.task_id(),
                error = %e,
                "Failed to remove task"
            );
        }
    }

    /// Run the job to completion. Called by the scheduler.
    ///
    /// Returns the status the work produced, or a neutral OK status when the
    /// job never got a task record.
    pub async fn run(&self) -> Status {
        {
            let mut book = self.shared.book.lock().await;
            if book.launched {
                warn!(job = %self.shared.config.name, "Job already ran");
                return book.real_result.clone().unwrap_or_else(neutral);
            }
            book.launched = true;

            if book.state == JobState::NotStarted && !self.shared.token.is_cancelled() {
                if let Err(e) = self.shared.start(&mut book).await {
                    error!(
                        job = %self.shared.config.name,
                        error = %e,
                        "Could not create task record"
                    );
                }
            }
        }

        let result = if self.shared.token.is_cancelled() {
            Status::canceled(CANCELED_MESSAGE)
        } else {
            self.execute().await
        };

        let mut book = self.shared.book.lock().await;
        book.real_result = Some(result.clone());
        let outcome = if book.record.is_none() {
            debug!(job = %self.shared.config.name, "No task record, nothing to update");
            self.shared
                .transition(&mut book, JobState::terminal_for(result.severity()));
            neutral()
        } else {
            self.shared.finish(&mut book, result.clone()).await;
            result
        };
        self.shared.cleanup(&mut book).await;
        outcome
    }

    async fn execute(&self) -> Status {
        let ctx = TaskContext {
            shared: Arc::clone(&self.shared),
        };
        let work = Arc::clone(&self.work);
        let mut handle = tokio::spawn(async move { work.perform(ctx).await });

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(status) => status,
                Err(e) if e.is_panic() => {
                    let reason = panic_message(e.into_panic());
                    error!(job = %self.shared.config.name, reason = %reason, "Task work panicked");
                    Status::error(HTTP_INTERNAL_SERVER_ERROR, UNEXPECTED_FAILURE_MESSAGE)
                        .with_cause(DetailedCause(reason))
                }
                Err(e) => {
                    warn!(job = %self.shared.config.name, error = %e, "Task work aborted");
                    Status::canceled(CANCELED_MESSAGE)
                }
            },
            _ = self.shared.token.cancelled() => {
                handle.abort();
                Status::canceled(CANCELED_MESSAGE)
            }
        }
    }
}

fn neutral() -> Status {
    Status::ok("OK")
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
