//! Task tracking — long-running work reported to polling clients.
//!
//! Core components:
//! - `state` — Job state machine (NotStarted → Running → Succeeded/Failed/Canceled)
//! - `record` — Registry-visible task record and its polling shape
//! - `registry` — Registry and canceler contracts
//! - `store` — In-memory registry with expiry and change broadcast
//! - `job` — TaskJob, which runs work and drives its record to a result
//! - `scheduler` — Runs jobs on the tokio runtime

pub mod job;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod store;

pub use job::{JobConfig, TaskContext, TaskJob, TaskWork, WorkFn, work_fn};
pub use record::TaskRecord;
pub use registry::{TaskCanceler, TaskRegistry};
pub use scheduler::{Scheduler, TokioScheduler};
pub use state::JobState;
pub use store::{StoreSummary, TaskStore, spawn_expiry_task};
