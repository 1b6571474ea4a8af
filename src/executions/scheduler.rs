use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use super::runner::{ActionJob, ActionRunner};

/// The external "run this later" capability. Implementations must not run
/// the job synchronously inside `schedule`.
pub trait JobScheduler: Send + Sync {
    fn schedule(&self, job: ActionJob, delay: Duration);
}

#[derive(Debug)]
struct ScheduledJob {
    job: ActionJob,
    delay: Duration,
}

/// In-process substrate: jobs go over a channel to [`spawn_job_worker`],
/// which sleeps out each delay and runs jobs under a concurrency cap.
#[derive(Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<ScheduledJob>,
}

pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<ScheduledJob>,
}

impl TokioScheduler {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, JobReceiver { rx })
    }
}

impl JobScheduler for TokioScheduler {
    fn schedule(&self, job: ActionJob, delay: Duration) {
        let execution_id = job.execution_id;
        if self.tx.send(ScheduledJob { job, delay }).is_err() {
            tracing::error!(%execution_id, "job worker stopped; dropping scheduled job");
        }
    }
}

pub fn spawn_job_worker(
    mut receiver: JobReceiver,
    runner: Arc<ActionRunner>,
    concurrency: usize,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    tokio::spawn(async move {
        while let Some(ScheduledJob { job, delay }) = receiver.rx.recv().await {
            let runner = Arc::clone(&runner);
            let permits = Arc::clone(&permits);

            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                match runner.perform(&job).await {
                    Ok(result) => {
                        tracing::debug!(execution_id = %job.execution_id, ?result, "job finished");
                    }
                    Err(err) => {
                        tracing::error!(
                            execution_id = %job.execution_id,
                            error = %err,
                            "job failed"
                        );
                    }
                }
            });
        }
    })
}
