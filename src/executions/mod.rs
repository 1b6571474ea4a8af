//! Per-(event, action) execution records and the claim/dispatch state machine.
//!
//! `pending -> processing` happens only through [`acquire_lock`];
//! `processing -> processed | failed` through [`mark_processed`] and
//! [`mark_failed`]; [`reset_for_retry`] returns a record to `pending`.
//! Every transition is a conditional update on `lock_version`, so a writer
//! holding a stale copy is rejected with [`ClaimError::VersionConflict`].

mod runner;
mod scheduler;
mod store;

pub use runner::{ActionExecutor, ActionJob, ActionOutcome, ActionRunner, RunResult};
pub use scheduler::{JobReceiver, JobScheduler, TokioScheduler, spawn_job_worker};
pub use store::{
    ClaimError, ERROR_MESSAGE_LIMIT, acquire_lock, create_pending, find_execution,
    get_execution, increment_attempt, list_for_event, mark_failed, mark_processed,
    max_attempts_reached, reset_for_replay, reset_for_retry,
};
