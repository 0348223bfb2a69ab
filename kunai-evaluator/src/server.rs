use crate::config;
use crate::evaluator::{self, EvaluatorOptions};
use crate::exec::ExecutorOptions;
use crate::queue::{run_testcase_job, RedisModule, RedisProgress, RedisQueue};
use crate::store::FileStore;

use kunai_protocol::{EvaluationConfig, EvaluationReport, JobEvent, JobReport, QueuedJob, TestcaseConfig};

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::{signal, task, time};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Drains the Redis testcase and evaluation queues until interrupted.
pub struct Server {
    redis: Arc<RedisModule>,
    executor: Arc<ExecutorOptions>,
    store: Arc<dyn FileStore>,
    evaluator: EvaluatorOptions,
    stopped: AtomicBool,
}

impl Server {
    pub fn new(
        redis: Arc<RedisModule>,
        executor: Arc<ExecutorOptions>,
        store: Arc<dyn FileStore>,
        evaluator: EvaluatorOptions,
    ) -> Self {
        Self {
            redis,
            executor,
            store,
            evaluator,
            stopped: AtomicBool::new(false),
        }
    }

    pub async fn run(self: Arc<Self>, workers: &config::Worker) -> Result<()> {
        let mut tasks = Vec::new();
        for worker in 0..workers.testcase_workers {
            let this = self.clone();
            tasks.push(task::spawn(async move { this.testcase_loop(worker).await }));
        }
        for worker in 0..workers.evaluation_workers {
            let this = self.clone();
            tasks.push(task::spawn(async move { this.evaluation_loop(worker).await }));
        }
        info!(
            testcase_workers = workers.testcase_workers,
            evaluation_workers = workers.evaluation_workers,
            "server started"
        );

        signal::ctrl_c().await?;
        info!("shutting down, waiting for running jobs");
        self.stopped.store(true, Relaxed);

        for handle in tasks {
            if let Err(err) = handle.await {
                error!("worker panicked: {}", err);
            }
        }
        info!("server stopped");
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Relaxed)
    }

    /// `None` on timeout or a broken connection.
    async fn next_job<T: DeserializeOwned>(&self, key: &str) -> Option<QueuedJob<T>> {
        match self.redis.pop(key).await {
            Ok(job) => job,
            Err(err) => {
                error!(%key, "failed to pop job: {:?}", err);
                time::sleep(Duration::from_secs(1)).await;
                None
            }
        }
    }

    async fn reply<T: Serialize>(&self, key: &str, id: Uuid, event: JobEvent<T>) {
        let report = JobReport::new(id, event);
        if let Err(err) = self.redis.push(key, &report).await {
            error!(job = %id, %key, "failed to push job report: {:?}", err);
        }
    }

    async fn testcase_loop(&self, worker: usize) {
        let key = self.redis.testcase_queue_key();
        info!(worker, %key, "testcase worker started");
        while !self.is_stopped() {
            let job: QueuedJob<TestcaseConfig> = match self.next_job(&key).await {
                Some(job) => job,
                None => continue,
            };
            let id = job.id;
            let reply_to = job.reply_to.clone();
            info!(worker, job = %id, input = %job.payload.tc_input_file_uri, "testcase job received");

            let event = run_testcase_job(job, &self.executor, &self.store).await;
            match reply_to {
                Some(reply_to) => self.reply(&reply_to, id, event).await,
                None => warn!(job = %id, "no reply queue, report dropped"),
            }
        }
        info!(worker, "testcase worker stopped");
    }

    async fn evaluation_loop(&self, worker: usize) {
        let key = self.redis.evaluation_queue_key();
        info!(worker, %key, "evaluation worker started");
        while !self.is_stopped() {
            let job: QueuedJob<EvaluationConfig> = match self.next_job(&key).await {
                Some(job) => job,
                None => continue,
            };
            let id = job.id;
            info!(worker, job = %id, submission = %job.payload.submission_file_uri, "evaluation job received");

            let queue = Arc::new(RedisQueue::new(self.redis.clone(), id));
            let progress = Arc::new(RedisProgress::new(self.redis.clone(), id));
            let options = self.evaluator.clone();
            let event: JobEvent<EvaluationReport> =
                match evaluator::evaluate(job.payload, queue, progress, options).await {
                    Ok(Ok(report)) => JobEvent::Complete(report),
                    Ok(Err(err)) => JobEvent::Failed {
                        message: err.to_string(),
                    },
                    Err(err) => {
                        warn!(job = %id, "rejected evaluation: {}", err);
                        JobEvent::Failed {
                            message: err.to_string(),
                        }
                    }
                };

            let reply_to = job.reply_to.unwrap_or_else(|| self.redis.report_key(id));
            self.reply(&reply_to, id, event).await;
        }
        info!(worker, "evaluation worker stopped");
    }
}
