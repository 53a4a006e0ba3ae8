use crate::engine::{CreateReport, ReconciliationEngine, UpdateReport};
use crate::recurrence::CronExpression;
use crate::remote::RemoteError;
use crate::store::{PersistenceError, PersistenceGateway};
use crate::task::SharedRegistry;
use chrono::Utc;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The operations a trigger can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Persist,
    CreateDue,
    UpdateStates,
}

impl Display for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Job::Persist => "persist",
            Job::CreateDue => "create-due",
            Job::UpdateStates => "update-states",
        };
        f.write_str(name)
    }
}

/// A job bound to the cron schedule it fires on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub job: Job,
    pub schedule: CronExpression,
}

impl Trigger {
    pub fn new(job: Job, schedule: CronExpression) -> Self {
        Self { job, schedule }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Saved(usize),
    Created(CreateReport),
    Updated(UpdateReport),
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Fires the save, create-due and update-states jobs on their own schedules.
///
/// Each trigger runs in its own task and finishes one job before waiting for its next
/// firing. Triggers are not serialized against each other; the registry lock is.
pub struct Scheduler {
    registry: SharedRegistry,
    engine: Arc<ReconciliationEngine>,
    persistence: PersistenceGateway,
}

impl Scheduler {
    pub fn new(
        registry: SharedRegistry,
        engine: Arc<ReconciliationEngine>,
        persistence: PersistenceGateway,
    ) -> Self {
        Self {
            registry,
            engine,
            persistence,
        }
    }

    /// Runs a single job to completion.
    pub async fn run_job(&self, job: Job) -> Result<JobOutcome, JobError> {
        Ok(match job {
            Job::Persist => JobOutcome::Saved(self.persistence.save(&self.registry).await?),
            Job::CreateDue => JobOutcome::Created(self.engine.create_due_tasks().await?),
            Job::UpdateStates => JobOutcome::Updated(self.engine.update_states().await?),
        })
    }

    /// Spawns one loop per trigger. The loops stop when `shutdown` fires.
    pub fn spawn(
        self: Arc<Self>,
        triggers: Vec<Trigger>,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        triggers
            .into_iter()
            .map(|trigger| {
                let scheduler = Arc::clone(&self);
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move { scheduler.run_trigger(trigger, shutdown_rx).await })
            })
            .collect()
    }

    async fn run_trigger(&self, trigger: Trigger, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!(job = %trigger.job, cron = %trigger.schedule, "Trigger armed");
        loop {
            let now = Utc::now();
            let Some(next) = trigger.schedule.next_after(now) else {
                tracing::warn!(job = %trigger.job, "Trigger schedule has no firings left");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(job = %trigger.job, "Trigger shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    self.fire(trigger.job).await;
                }
            }
        }
    }

    async fn fire(&self, job: Job) {
        match self.run_job(job).await {
            Ok(JobOutcome::Saved(count)) => {
                tracing::info!(job = %job, "Saved {} tasks", count)
            }
            Ok(JobOutcome::Created(report)) => {
                tracing::info!(job = %job, created = report.created, "Created due tasks")
            }
            Ok(JobOutcome::Updated(report)) => tracing::info!(
                job = %job,
                completed = report.completed,
                still_open = report.still_open,
                vanished = report.vanished,
                missing = report.missing,
                healed = report.healed,
                "Updated task states"
            ),
            Err(e) => tracing::error!(job = %job, "Job failed: {}", e),
        }
    }
}
