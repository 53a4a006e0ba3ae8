use crate::clock::Clock;
use crate::recurrence::{self, CronExpression, Occasion, RecurrenceError, RepeatPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use uuid::Uuid;

pub mod api;
pub mod registry;

pub use registry::{SharedRegistry, TaskRegistry};

/// A recurring unit of work mirrored into the remote tracker whenever it falls due.
#[derive(Debug, PartialEq, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "TaskRecord")]
pub struct Task {
    id: Uuid,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_remote_id: Option<String>,
    next_due_at: DateTime<Utc>,
    is_completed: bool,
    repeat: RepeatPolicy,
    #[serde(default, skip_serializing_if = "is_zero")]
    missed_polls: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// A task as read back from a snapshot, before its invariants are checked.
#[derive(Deserialize)]
struct TaskRecord {
    id: Uuid,
    title: String,
    #[serde(default)]
    last_remote_id: Option<String>,
    next_due_at: DateTime<Utc>,
    is_completed: bool,
    repeat: RepeatPolicy,
    #[serde(default)]
    missed_polls: u32,
}

/// A stored task record that breaks a task invariant.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvalidTaskRecord {
    #[error("Task {0} has an empty title")]
    MissingTitle(Uuid),
    #[error("Task {id} is completed but still references remote item '{remote_id}'")]
    CompletedWithRemote { id: Uuid, remote_id: String },
}

impl TryFrom<TaskRecord> for Task {
    type Error = InvalidTaskRecord;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        if record.title.trim().is_empty() {
            return Err(InvalidTaskRecord::MissingTitle(record.id));
        }
        if let (true, Some(remote_id)) = (record.is_completed, &record.last_remote_id) {
            return Err(InvalidTaskRecord::CompletedWithRemote {
                id: record.id,
                remote_id: remote_id.clone(),
            });
        }
        Ok(Self {
            id: record.id,
            title: record.title,
            last_remote_id: record.last_remote_id,
            next_due_at: record.next_due_at,
            is_completed: record.is_completed,
            repeat: record.repeat,
            missed_polls: record.missed_polls,
        })
    }
}

/// The raw, unvalidated description of a task as supplied by a caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub repeat_hours: Option<i64>,
    #[serde(default)]
    pub cron: Option<String>,
}

impl NewTask {
    /// A task repeating `hours` after each completion.
    pub fn every_hours(title: impl Into<String>, hours: i64) -> Self {
        Self {
            title: title.into(),
            repeat_hours: Some(hours),
            cron: None,
        }
    }

    /// A task repeating on a six-field cron schedule.
    pub fn on_cron(title: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            repeat_hours: None,
            cron: Some(expression.into()),
        }
    }

    /// Resolves the interval/cron pair into exactly one repeat policy.
    ///
    /// A non-positive interval counts as absent when a cron expression is supplied.
    fn repeat_policy(&self) -> Result<RepeatPolicy, TaskError> {
        let cron = self.cron.as_deref().map(str::trim).filter(|c| !c.is_empty());
        match (cron, self.repeat_hours) {
            (Some(_), Some(hours)) if hours > 0 => Err(TaskError::AmbiguousRepeatPolicy),
            (Some(expression), _) => Ok(RepeatPolicy::CronSchedule {
                expression: expression.parse::<CronExpression>()?,
            }),
            (None, Some(hours)) => u32::try_from(hours)
                .ok()
                .and_then(NonZeroU32::new)
                .map(|hours| RepeatPolicy::FixedInterval { hours })
                .ok_or(TaskError::InvalidInterval(hours)),
            (None, None) => Err(TaskError::MissingRepeatPolicy),
        }
    }
}

/// Errors surfaced to callers of the task CRUD operations.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TaskError {
    #[error("Task title must not be empty")]
    MissingTitle,
    #[error("Either an hour interval or a cron expression is required")]
    MissingRepeatPolicy,
    #[error("Only one of an hour interval or a cron expression may be given")]
    AmbiguousRepeatPolicy,
    #[error("Repeat interval must be a positive number of hours, got {0}")]
    InvalidInterval(i64),
    #[error(transparent)]
    InvalidCron(#[from] RecurrenceError),
    #[error("Task with ID {0} not found")]
    NotFound(Uuid),
}

impl Task {
    /// Validates `new_task` and builds a task that is completed and waiting to fall due.
    pub fn new(new_task: NewTask, now: DateTime<Utc>) -> Result<Self, TaskError> {
        if new_task.title.trim().is_empty() {
            return Err(TaskError::MissingTitle);
        }
        let repeat = new_task.repeat_policy()?;
        if let RepeatPolicy::CronSchedule { expression } = &repeat {
            if expression.next_after(now).is_none() {
                return Err(RecurrenceError::NeverFires(expression.to_string()).into());
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            title: new_task.title,
            last_remote_id: None,
            next_due_at: recurrence::compute_next(&repeat, now, Occasion::Creation),
            is_completed: true,
            repeat,
            missed_polls: 0,
        })
    }

    /// Returns the ID of the task.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the title sent to the remote tracker.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the ID of the outstanding remote item, if any.
    pub fn last_remote_id(&self) -> Option<&str> {
        self.last_remote_id.as_deref()
    }

    pub fn next_due_at(&self) -> DateTime<Utc> {
        self.next_due_at
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    pub fn repeat(&self) -> &RepeatPolicy {
        &self.repeat
    }

    /// Consecutive update passes in which the outstanding remote item was missing.
    pub fn missed_polls(&self) -> u32 {
        self.missed_polls
    }

    /// A task is due once it has no outstanding item and its deadline has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_completed && now > self.next_due_at
    }

    pub(crate) fn regenerate_id(&mut self) {
        self.id = Uuid::new_v4();
    }

    pub(crate) fn attach_remote(&mut self, remote_id: String) {
        self.last_remote_id = Some(remote_id);
        self.is_completed = false;
        self.missed_polls = 0;
    }

    /// Closes the outstanding occurrence and schedules the next one from `completed_at`.
    pub(crate) fn complete_at(&mut self, completed_at: DateTime<Utc>) {
        self.is_completed = true;
        self.last_remote_id = None;
        self.missed_polls = 0;
        self.next_due_at =
            recurrence::compute_next(&self.repeat, completed_at, Occasion::Completion);
    }

    pub(crate) fn still_open(&mut self) {
        self.is_completed = false;
        self.missed_polls = 0;
    }

    pub(crate) fn record_missed_poll(&mut self) -> u32 {
        self.missed_polls = self.missed_polls.saturating_add(1);
        self.missed_polls
    }

    /// Marks a task with no remote item as completed without touching its deadline.
    pub(crate) fn heal_orphan(&mut self) {
        self.is_completed = true;
        self.missed_polls = 0;
    }

    pub(crate) fn force_due(&mut self, now: DateTime<Utc>) {
        self.next_due_at = now;
    }
}

/// CRUD operations over the shared registry, as exposed to the HTTP front door.
#[derive(Clone)]
pub struct TaskService {
    registry: SharedRegistry,
    clock: Arc<dyn Clock>,
}

impl TaskService {
    pub fn new(registry: SharedRegistry, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Creates a new task and appends it to the registry.
    ///
    /// # Arguments
    ///
    /// * `new_task` - The unvalidated task description.
    ///
    /// # Returns
    ///
    /// A `Result` containing the created `Task`, or the validation error. The registry is
    /// unchanged on error.
    #[tracing::instrument(skip(self))]
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task, TaskError> {
        let now = self.clock.now();
        let task = self.registry.lock().await.create_task(new_task, now)?;
        tracing::info!(task_id = %task.id(), "Created task '{}'", task.title());
        Ok(task)
    }

    /// Retrieves all tasks in insertion order.
    #[tracing::instrument(skip(self))]
    pub async fn list_tasks(&self) -> Vec<Task> {
        self.registry.lock().await.list_tasks()
    }

    /// Deletes a task by its ID. Deleting an unknown ID is not an error.
    ///
    /// # Returns
    ///
    /// `true` if a task was removed.
    #[tracing::instrument(skip(self))]
    pub async fn delete_task(&self, id: Uuid) -> bool {
        let removed = self.registry.lock().await.delete_task(id);
        if removed {
            tracing::info!(task_id = %id, "Deleted task");
        }
        removed
    }

    /// Brings a task's deadline forward to now.
    ///
    /// # Returns
    ///
    /// A `Result` containing the updated `Task`, or `TaskError::NotFound`.
    #[tracing::instrument(skip(self))]
    pub async fn trigger_now(&self, id: Uuid) -> Result<Task, TaskError> {
        let now = self.clock.now();
        self.registry.lock().await.trigger_now(id, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn new_interval_task_starts_completed_and_due_now() {
        let task = Task::new(NewTask::every_hours("Water plants", 24), now()).unwrap();

        assert_eq!(task.title(), "Water plants");
        assert!(task.is_completed());
        assert_eq!(task.last_remote_id(), None);
        assert_eq!(task.next_due_at(), now());
        assert_eq!(
            task.repeat(),
            &RepeatPolicy::FixedInterval {
                hours: NonZeroU32::new(24).unwrap()
            }
        );
        assert!(!task.is_due(now()));
        assert!(task.is_due(now() + TimeDelta::seconds(1)));
    }

    #[test]
    fn new_cron_task_waits_for_first_firing() {
        let task = Task::new(NewTask::on_cron("Standup", "0 0 9 * * *"), now()).unwrap();

        assert_eq!(
            task.next_due_at(),
            Utc.with_ymd_and_hms(2024, 6, 2, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_missing_title() {
        let err = Task::new(NewTask::every_hours("   ", 1), now()).unwrap_err();
        assert_eq!(err, TaskError::MissingTitle);
    }

    #[test]
    fn rejects_missing_policy() {
        let new_task = NewTask {
            title: "x".to_string(),
            ..Default::default()
        };
        assert_eq!(
            Task::new(new_task, now()).unwrap_err(),
            TaskError::MissingRepeatPolicy
        );
    }

    #[test]
    fn rejects_non_positive_interval() {
        assert_eq!(
            Task::new(NewTask::every_hours("x", 0), now()).unwrap_err(),
            TaskError::InvalidInterval(0)
        );
        assert_eq!(
            Task::new(NewTask::every_hours("x", -3), now()).unwrap_err(),
            TaskError::InvalidInterval(-3)
        );
    }

    #[test]
    fn rejects_both_policies() {
        let new_task = NewTask {
            title: "x".to_string(),
            repeat_hours: Some(4),
            cron: Some("0 0 9 * * *".to_string()),
        };
        assert_eq!(
            Task::new(new_task, now()).unwrap_err(),
            TaskError::AmbiguousRepeatPolicy
        );
    }

    #[test]
    fn zero_interval_yields_to_cron() {
        let new_task = NewTask {
            title: "x".to_string(),
            repeat_hours: Some(0),
            cron: Some("0 0 9 * * *".to_string()),
        };
        let task = Task::new(new_task, now()).unwrap();
        assert!(matches!(task.repeat(), RepeatPolicy::CronSchedule { .. }));
    }

    #[test]
    fn rejects_invalid_and_exhausted_cron() {
        assert!(matches!(
            Task::new(NewTask::on_cron("x", "not cron"), now()),
            Err(TaskError::InvalidCron(RecurrenceError::InvalidCron { .. }))
        ));
        assert!(matches!(
            Task::new(NewTask::on_cron("x", "0 0 0 1 1 * 2001"), now()),
            Err(TaskError::InvalidCron(RecurrenceError::NeverFires(_)))
        ));
    }

    #[test]
    fn completion_clears_remote_reference() {
        let mut task = Task::new(NewTask::every_hours("x", 2), now()).unwrap();
        task.attach_remote("abc".to_string());
        assert!(!task.is_completed());
        assert_eq!(task.last_remote_id(), Some("abc"));

        task.complete_at(now());

        assert!(task.is_completed());
        assert_eq!(task.last_remote_id(), None);
        assert_eq!(task.next_due_at(), now() + TimeDelta::hours(2));
    }
}
