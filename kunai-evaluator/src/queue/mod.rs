mod local;
mod redis;

pub use self::local::LocalQueue;
pub use self::redis::{RedisModule, RedisProgress, RedisQueue};

use crate::exec::{evaluate_testcase, ExecutorOptions};
use crate::store::FileStore;

use kunai_protocol::{JobEvent, QueuedJob, TestcaseConfig, TestcaseResult};

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

pub type TestcaseEvent = JobEvent<TestcaseResult>;

/// Pending result of an enqueued testcase job.
pub struct JobHandle {
    rx: oneshot::Receiver<TestcaseEvent>,
}

impl JobHandle {
    pub fn new(rx: oneshot::Receiver<TestcaseEvent>) -> Self {
        Self { rx }
    }

    /// `None` if the queue dropped the job without reporting.
    pub async fn wait(self) -> Option<TestcaseEvent> {
        self.rx.await.ok()
    }
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, config: TestcaseConfig) -> BoxFuture<'_, Result<JobHandle>>;
}

pub trait ProgressSink: Send + Sync {
    fn progress(&self, current: usize, total: usize, payload: String) -> BoxFuture<'_, Result<()>>;
}

/// Writes progress to the log.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn progress(&self, current: usize, total: usize, payload: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(current, total, "progress");
            debug!("\n{}", payload);
            Ok(())
        })
    }
}

/// Executes one testcase job, turning internal faults into a failure event.
pub(crate) async fn run_testcase_job(
    job: QueuedJob<TestcaseConfig>,
    options: &Arc<ExecutorOptions>,
    store: &Arc<dyn FileStore>,
) -> TestcaseEvent {
    let id = job.id;
    match evaluate_testcase(job.payload, options.clone(), store.clone()).await {
        Ok(result) => JobEvent::Complete(result),
        Err(err) => {
            error!(job = %id, "testcase evaluation failed: {:?}", err);
            JobEvent::Failed {
                message: format!("{:#}", err),
            }
        }
    }
}
