use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::actions::ActionPolicy;
use crate::clock::Clock;
use crate::db::StoreError;
use crate::events::recompute_status;
use crate::observability::Signal;
use crate::types::ActionExecution;

use super::scheduler::JobScheduler;
use super::store::{
    ClaimError, acquire_lock, get_execution, increment_attempt, mark_failed, mark_processed,
    max_attempts_reached, reset_for_retry,
};

/// One unit of work handed to the job substrate. Carries the policy that was
/// in force when the action was selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionJob {
    pub execution_id: Uuid,
    pub event_id: Uuid,
    pub action_id: String,
    pub policy: ActionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    RetryableFailure(String),
    FatalFailure(String),
}

/// Runs the host application's action code.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action_id: &str, event_id: Uuid, attempt: i64) -> ActionOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Processed,
    RetryScheduled { delay: Duration },
    Failed,
    /// Another worker holds or finished the record.
    Skipped,
}

pub struct ActionRunner {
    pool: SqlitePool,
    executor: Arc<dyn ActionExecutor>,
    scheduler: Arc<dyn JobScheduler>,
    clock: Arc<dyn Clock>,
    worker_id: String,
    lock_timeout: chrono::Duration,
}

impl ActionRunner {
    pub fn new(
        pool: SqlitePool,
        executor: Arc<dyn ActionExecutor>,
        scheduler: Arc<dyn JobScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            executor,
            scheduler,
            clock,
            worker_id: format!("hookrelay-{}", Uuid::new_v4()),
            lock_timeout: chrono::Duration::minutes(5),
        }
    }

    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout =
            chrono::Duration::from_std(lock_timeout).unwrap_or(chrono::Duration::minutes(5));
        self
    }

    pub fn scheduler(&self) -> &Arc<dyn JobScheduler> {
        &self.scheduler
    }

    /// Drives one attempt of `job`: claim, count, execute, record the outcome,
    /// schedule a retry if one is due, and refresh the event's status.
    pub async fn perform(&self, job: &ActionJob) -> Result<RunResult, StoreError> {
        let mut record = get_execution(&self.pool, job.execution_id).await?;

        match acquire_lock(
            &self.pool,
            &mut record,
            &self.worker_id,
            self.lock_timeout,
            self.clock.now(),
        )
        .await
        {
            Ok(()) => {}
            Err(ClaimError::Store(err)) => return Err(err),
            Err(err) => {
                tracing::debug!(
                    execution_id = %job.execution_id,
                    error = %err,
                    "claim not acquired"
                );
                return Ok(RunResult::Skipped);
            }
        }

        let result = match self.run_claimed(job, &mut record).await {
            Ok(result) => result,
            Err(ClaimError::Store(err)) => return Err(err),
            Err(err) => {
                tracing::warn!(
                    execution_id = %job.execution_id,
                    error = %err,
                    "claim lost mid-run"
                );
                RunResult::Skipped
            }
        };

        recompute_status(&self.pool, job.event_id, self.clock.now()).await?;
        Ok(result)
    }

    async fn run_claimed(
        &self,
        job: &ActionJob,
        record: &mut ActionExecution,
    ) -> Result<RunResult, ClaimError> {
        increment_attempt(&self.pool, record, self.clock.now()).await?;
        let attempt = record.attempt_count;

        Signal::ActionStarted {
            action_id: &job.action_id,
            event_id: job.event_id,
            attempt,
        }
        .emit();

        let outcome = self
            .executor
            .execute(&job.action_id, job.event_id, attempt)
            .await;

        match outcome {
            ActionOutcome::Success => {
                mark_processed(&self.pool, record, self.clock.now()).await?;
                Signal::ActionCompleted {
                    action_id: &job.action_id,
                    event_id: job.event_id,
                    attempt,
                }
                .emit();
                Ok(RunResult::Processed)
            }
            ActionOutcome::RetryableFailure(error) => {
                mark_failed(&self.pool, record, &error, self.clock.now()).await?;
                let will_retry = !max_attempts_reached(record, job.policy.max_attempts);
                Signal::ActionFailed {
                    action_id: &job.action_id,
                    event_id: job.event_id,
                    attempt,
                    error: record.error_message.as_deref().unwrap_or_default(),
                    will_retry,
                }
                .emit();

                if !will_retry {
                    return Ok(RunResult::Failed);
                }

                reset_for_retry(&self.pool, record, self.clock.now()).await?;
                let retry_index = usize::try_from(attempt.saturating_sub(1)).unwrap_or_default();
                let delay = job.policy.retry_delay(retry_index);
                self.scheduler.schedule(job.clone(), delay);
                Ok(RunResult::RetryScheduled { delay })
            }
            ActionOutcome::FatalFailure(error) => {
                mark_failed(&self.pool, record, &error, self.clock.now()).await?;
                Signal::ActionFailed {
                    action_id: &job.action_id,
                    event_id: job.event_id,
                    attempt,
                    error: record.error_message.as_deref().unwrap_or_default(),
                    will_retry: false,
                }
                .emit();
                Ok(RunResult::Failed)
            }
        }
    }
}
