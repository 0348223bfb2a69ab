use super::{run_testcase_job, JobHandle, JobQueue, TestcaseEvent};
use crate::exec::ExecutorOptions;
use crate::store::FileStore;

use kunai_protocol::{QueuedJob, TestcaseConfig};
use kunai_utils::queue::Queue;

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task;
use tracing::{debug, warn};

struct Task {
    job: QueuedJob<TestcaseConfig>,
    reply: oneshot::Sender<TestcaseEvent>,
}

/// In-process queue drained by a pool of worker tasks.
pub struct LocalQueue {
    queue: Queue<Task>,
}

impl LocalQueue {
    /// Spawns `workers` tasks on the current runtime.
    pub fn start(workers: usize, options: Arc<ExecutorOptions>, store: Arc<dyn FileStore>) -> Self {
        let queue = Queue::unbounded();
        for worker in 0..workers {
            let queue = queue.clone();
            let options = options.clone();
            let store = store.clone();
            task::spawn(async move { worker_loop(worker, queue, options, store).await });
        }
        Self { queue }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for LocalQueue {
    fn drop(&mut self) {
        self.queue.close();
    }
}

async fn worker_loop(
    worker: usize,
    queue: Queue<Task>,
    options: Arc<ExecutorOptions>,
    store: Arc<dyn FileStore>,
) {
    debug!(worker, "local worker started");
    while let Some(Task { job, reply }) = queue.pop().await {
        let id = job.id;
        let event = run_testcase_job(job, &options, &store).await;
        if reply.send(event).is_err() {
            warn!(worker, job = %id, "job handle dropped before completion");
        }
    }
    debug!(worker, "local worker stopped");
}

impl JobQueue for LocalQueue {
    fn enqueue(&self, config: TestcaseConfig) -> BoxFuture<'_, Result<JobHandle>> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            let job = QueuedJob::new(config, None);
            debug!(job = %job.id, input = %job.payload.tc_input_file_uri, "enqueue");
            let task = Task { job, reply: tx };
            if self.queue.push(task).await.is_err() {
                anyhow::bail!("local queue is closed");
            }
            Ok(JobHandle::new(rx))
        })
    }
}
