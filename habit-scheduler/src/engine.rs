//! Drives the create/poll cycle between the local registry and the remote tracker.
//!
//! Both passes hold the registry lock from start to finish, so they never interleave with
//! each other or with CRUD operations mid-pass.

use crate::clock::Clock;
use crate::remote::{NewRemoteItem, RemoteError, RemoteItem, RemoteTracker};
use crate::task::SharedRegistry;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of one [`ReconciliationEngine::create_due_tasks`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CreateReport {
    pub created: usize,
}

/// Outcome of one [`ReconciliationEngine::update_states`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    /// Remote item reported completed.
    pub completed: usize,
    /// Remote item still open.
    pub still_open: usize,
    /// Remote item missing long enough to be assumed completed.
    pub vanished: usize,
    /// Remote item missing, but not yet for `vanish_threshold` passes.
    pub missing: usize,
    /// Open task without a remote item, marked completed.
    pub healed: usize,
}

pub struct ReconciliationEngine {
    registry: SharedRegistry,
    remote: Arc<dyn RemoteTracker>,
    clock: Arc<dyn Clock>,
    vanish_threshold: u32,
}

impl ReconciliationEngine {
    pub fn new(
        registry: SharedRegistry,
        remote: Arc<dyn RemoteTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            remote,
            clock,
            vanish_threshold: 1,
        }
    }

    /// Number of consecutive update passes a remote item must be missing before its task is
    /// assumed completed. Values below 1 are treated as 1.
    pub fn with_vanish_threshold(mut self, threshold: u32) -> Self {
        self.vanish_threshold = threshold.max(1);
        self
    }

    /// Creates a remote item for every due task, in registry order.
    ///
    /// The first failing remote call aborts the pass. Tasks handled before the failure keep
    /// their new remote reference; the rest stay due for the next pass.
    #[tracing::instrument(skip(self))]
    pub async fn create_due_tasks(&self) -> Result<CreateReport, RemoteError> {
        let mut registry = self.registry.lock().await;
        let now = self.clock.now();
        let mut report = CreateReport::default();

        for task in registry.tasks_mut() {
            if !task.is_due(now) {
                continue;
            }

            let item = NewRemoteItem::todo(task.title(), now);
            let created = match self.remote.create_item(&item).await {
                Ok(created) if created.id.is_empty() => Err(RemoteError::MissingId),
                other => other,
            }
            .inspect_err(|e| {
                tracing::error!(task_id = %task.id(), "Failed to create remote item: {}", e)
            })?;

            tracing::info!(
                task_id = %task.id(),
                remote_id = %created.id,
                "Task is due, created remote item"
            );
            task.attach_remote(created.id);
            report.created += 1;
        }

        Ok(report)
    }

    /// Folds the remote tracker's completion state back into the registry.
    ///
    /// The remote list is fetched once, after the registry lock is taken, so a failed fetch
    /// leaves every task untouched.
    #[tracing::instrument(skip(self))]
    pub async fn update_states(&self) -> Result<UpdateReport, RemoteError> {
        let mut registry = self.registry.lock().await;
        let items = self.remote.fetch_items().await?;
        let now = self.clock.now();
        let by_id: HashMap<&str, &RemoteItem> =
            items.iter().map(|item| (item.id.as_str(), item)).collect();
        let mut report = UpdateReport::default();

        for task in registry.tasks_mut() {
            match task.last_remote_id().map(|id| by_id.get(id).copied()) {
                None => {
                    if !task.is_completed() {
                        tracing::warn!(
                            task_id = %task.id(),
                            "Open task has no remote item, marking completed"
                        );
                        task.heal_orphan();
                        report.healed += 1;
                    }
                }
                Some(Some(item)) if item.completed => {
                    task.complete_at(item.date_completed.unwrap_or(now));
                    tracing::info!(
                        task_id = %task.id(),
                        next_due_at = %task.next_due_at(),
                        "Remote item completed"
                    );
                    report.completed += 1;
                }
                Some(Some(_)) => {
                    task.still_open();
                    report.still_open += 1;
                }
                Some(None) => {
                    let missed = task.record_missed_poll();
                    if missed >= self.vanish_threshold {
                        task.complete_at(now);
                        tracing::warn!(
                            task_id = %task.id(),
                            next_due_at = %task.next_due_at(),
                            "Remote item vanished, assuming completed"
                        );
                        report.vanished += 1;
                    } else {
                        tracing::warn!(
                            task_id = %task.id(),
                            "Remote item missing ({}/{})",
                            missed,
                            self.vanish_threshold
                        );
                        report.missing += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}
