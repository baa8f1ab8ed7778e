//! Task records: what polling clients see of one unit of work.
//!
//! A record is running exactly while it has no result. `done` is the only way
//! to set the result and it succeeds once; later calls leave the record alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::Status;
use crate::tasks::state::JobState;

/// Registry-visible state of one in-flight or finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "TaskRecordWire", from = "TaskRecordWire")]
pub struct TaskRecord {
    task_id: Uuid,
    user_id: String,
    name: String,
    message: String,
    idempotent: bool,
    cancelable: bool,
    result: Option<Status>,
    result_location: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a new running record with a fresh id.
    pub fn new(
        name: impl Into<String>,
        user_id: impl Into<String>,
        idempotent: bool,
        cancelable: bool,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            message: String::new(),
            idempotent,
            cancelable,
            result: None,
            result_location: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn cancelable(&self) -> bool {
        self.cancelable
    }

    pub fn result(&self) -> Option<&Status> {
        self.result.as_ref()
    }

    pub fn result_location(&self) -> Option<&str> {
        self.result_location.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_running(&self) -> bool {
        self.result.is_none()
    }

    /// Lifecycle state derived from the result.
    pub fn state(&self) -> JobState {
        match &self.result {
            None => JobState::Running,
            Some(status) => JobState::terminal_for(status.severity()),
        }
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// Record the terminal result. The location is kept only for OK results.
    ///
    /// Returns `false` without touching anything if a result is already set.
    pub fn done(&mut self, result: Status, location: Option<String>) -> bool {
        if !self.is_running() {
            return false;
        }
        if result.is_ok() {
            self.result_location = location;
        }
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        true
    }
}

/// Polling wire shape. `Running` is always derived from `Result`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskRecordWire {
    id: Uuid,
    user_id: String,
    name: String,
    message: String,
    #[serde(default)]
    running: bool,
    idempotent: bool,
    can_be_canceled: bool,
    created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl From<TaskRecord> for TaskRecordWire {
    fn from(record: TaskRecord) -> Self {
        Self {
            running: record.is_running(),
            id: record.task_id,
            user_id: record.user_id,
            name: record.name,
            message: record.message,
            idempotent: record.idempotent,
            can_be_canceled: record.cancelable,
            created: record.created_at,
            completed: record.completed_at,
            result: record.result,
            location: record.result_location,
        }
    }
}

impl From<TaskRecordWire> for TaskRecord {
    fn from(wire: TaskRecordWire) -> Self {
        let location = match &wire.result {
            Some(status) if status.is_ok() => wire.location,
            _ => None,
        };
        let completed_at = wire.result.as_ref().and(wire.completed);
        Self {
            task_id: wire.id,
            user_id: wire.user_id,
            name: wire.name,
            message: wire.message,
            idempotent: wire.idempotent,
            cancelable: wire.can_be_canceled,
            result: wire.result,
            result_location: location,
            created_at: wire.created,
            completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Severity;

    #[test]
    fn new_record_is_running() {
        let record = TaskRecord::new("Listing tags", "alice", true, false);
        assert!(record.is_running());
        assert_eq!(record.state(), JobState::Running);
        assert!(record.result().is_none());
        assert!(record.completed_at().is_none());
        assert_eq!(record.user_id(), "alice");
        assert!(record.idempotent());
        assert!(!record.cancelable());
    }

    #[test]
    fn done_sets_result_once() {
        let mut record = TaskRecord::new("Scan", "bob", false, true);
        assert!(record.done(Status::ok("first"), Some("/x/y".to_string())));
        assert!(!record.is_running());
        assert_eq!(record.state(), JobState::Succeeded);
        assert_eq!(record.result_location(), Some("/x/y"));

        assert!(!record.done(Status::canceled("late"), None));
        assert_eq!(record.result().unwrap().message(), "first");
        assert_eq!(record.result_location(), Some("/x/y"));
    }

    #[test]
    fn location_dropped_for_failures() {
        let mut record = TaskRecord::new("Scan", "bob", false, false);
        record.done(Status::error(404, "missing"), Some("/x".to_string()));
        assert_eq!(record.state(), JobState::Failed);
        assert!(record.result_location().is_none());
    }

    #[test]
    fn polling_shape() {
        let mut record = TaskRecord::new("Scan", "carol", true, true);
        record.set_message("Working");
        let running = serde_json::to_value(&record).unwrap();
        assert_eq!(running["Running"], true);
        assert_eq!(running["Message"], "Working");
        assert_eq!(running["CanBeCanceled"], true);
        assert!(running.get("Result").is_none());

        record.done(Status::ok("All good"), Some("/x/y".to_string()));
        let done = serde_json::to_value(&record).unwrap();
        assert_eq!(done["Running"], false);
        assert_eq!(done["Result"]["Severity"], "Ok");
        assert_eq!(done["Result"]["HttpCode"], 200);
        assert_eq!(done["Location"], "/x/y");
        assert_eq!(done["Id"], record.task_id().to_string());
    }

    #[test]
    fn running_flag_is_derived_on_read() {
        let mut record = TaskRecord::new("Scan", "dave", false, false);
        record.done(Status::canceled("Task was canceled."), None);
        let mut value = serde_json::to_value(&record).unwrap();
        value["Running"] = serde_json::Value::Bool(true);

        let parsed: TaskRecord = serde_json::from_value(value).unwrap();
        assert!(!parsed.is_running());
        assert_eq!(parsed.result().unwrap().severity(), Severity::Cancel);
        assert_eq!(parsed, record);
    }
}
