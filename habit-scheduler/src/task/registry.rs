use super::{NewTask, Task, TaskError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// The registry as shared between the CRUD surface and the scheduler jobs.
///
/// Every operation holds the lock for its full duration.
pub type SharedRegistry = Arc<tokio::sync::Mutex<TaskRegistry>>;

/// Ordered collection of tasks; insertion order only affects listing.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TaskRegistry {
    #[serde(default)]
    tasks: Vec<Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps the registry in the lock shared by every mutator.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Restores a registry from a snapshot produced by [`TaskRegistry::to_snapshot`].
    ///
    /// Fails on records that break a task invariant, such as a completed task still holding a
    /// remote ID or a zero-hour interval.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serializes the whole registry as a single JSON object.
    pub fn to_snapshot(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Validates and appends a new task, returning a copy of it.
    pub fn create_task(
        &mut self,
        new_task: NewTask,
        now: DateTime<Utc>,
    ) -> Result<Task, TaskError> {
        let mut task = Task::new(new_task, now)?;
        while self.get(task.id()).is_some() {
            task.regenerate_id();
        }
        self.tasks.push(task.clone());
        Ok(task)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.tasks.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id() == id)
    }

    /// Removes the task with `id`. Returns `false` if there was none.
    pub fn delete_task(&mut self, id: Uuid) -> bool {
        match self.tasks.iter().position(|task| task.id() == id) {
            Some(index) => {
                self.tasks.remove(index);
                true
            }
            None => false,
        }
    }

    /// Makes the task with `id` due as of `now` without touching its completion state.
    pub fn trigger_now(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<Task, TaskError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|task| task.id() == id)
            .ok_or(TaskError::NotFound(id))?;
        task.force_due(now);
        Ok(task.clone())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn tasks_mut(&mut self) -> std::slice::IterMut<'_, Task> {
        self.tasks.iter_mut()
    }
}
