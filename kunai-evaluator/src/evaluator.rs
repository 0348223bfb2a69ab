use crate::progress;
use crate::queue::{JobQueue, ProgressSink, TestcaseEvent};

use kunai_protocol::result::InvalidTransition;
use kunai_protocol::{
    ConfigError, EvaluationConfig, EvaluationError, EvaluationReport, JobEvent, ProgressTree,
    TestcaseConfig, TestcaseKey, TestcaseProgress,
};

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

pub type Outcome = Result<EvaluationReport, EvaluationError>;

/// Limits attached to every dispatched testcase job.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorOptions {
    /// seconds, executor default when `None`
    pub internal_time_limit: Option<f64>,
    /// MiB, executor default when `None`
    pub internal_memory_limit: Option<f64>,
}

/// Drives one submission evaluation: dispatches a job per testcase, tracks
/// the progress tree and reports the aggregated outcome exactly once.
pub struct BatchEvaluator {
    config: EvaluationConfig,
    queue: Arc<dyn JobQueue>,
    progress: Arc<dyn ProgressSink>,
    options: EvaluatorOptions,
    tree: ProgressTree,
    done: Option<oneshot::Sender<Outcome>>,
}

impl BatchEvaluator {
    pub fn new(
        config: EvaluationConfig,
        queue: Arc<dyn JobQueue>,
        progress: Arc<dyn ProgressSink>,
        options: EvaluatorOptions,
    ) -> Result<(Self, oneshot::Receiver<Outcome>), ConfigError> {
        config.check()?;

        for (idx, subtask) in config.evaluation_structure.iter().enumerate() {
            match subtask.score_multiplier {
                Some(value) if (value - 1.0).abs() > f64::EPSILON => {
                    warn!(subtask = idx + 1, value, "score multiplier is not applied");
                }
                _ => {}
            }
        }

        let tree = ProgressTree::new(&config.evaluation_structure);
        let (tx, rx) = oneshot::channel();
        let evaluator = Self {
            config,
            queue,
            progress,
            options,
            tree,
            done: Some(tx),
        };
        Ok((evaluator, rx))
    }

    pub fn tree(&self) -> &ProgressTree {
        &self.tree
    }

    fn job_config(&self, key: TestcaseKey) -> TestcaseConfig {
        let mut config = self.config.testcase(key.subtask, key.testcase);
        config.internal_time_limit = self.options.internal_time_limit;
        config.internal_memory_limit = self.options.internal_memory_limit;
        config
    }

    fn transit<F>(&mut self, key: TestcaseKey, f: F)
    where
        F: FnOnce(&mut TestcaseProgress) -> Result<(), InvalidTransition>,
    {
        match self.tree.get_mut(key) {
            None => warn!(%key, "no such testcase"),
            Some(tc) => {
                if let Err(err) = f(tc) {
                    warn!(%key, "{}", err);
                }
            }
        }
    }

    async fn publish(&self) {
        let payload = progress::render(&self.tree);
        let current = self.tree.resolved();
        let total = self.tree.total();
        if let Err(err) = self.progress.progress(current, total, payload).await {
            warn!(current, total, "failed to publish progress: {:?}", err);
        }
    }

    fn handle(&mut self, key: TestcaseKey, event: Option<TestcaseEvent>) {
        match event {
            Some(JobEvent::Complete(result)) if result.is_valid() => {
                debug!(%key, score = result.score, message = %result.message, "testcase completed");
                self.transit(key, move |tc| tc.complete(result));
            }
            Some(JobEvent::Complete(result)) => {
                warn!(%key, score = result.score, "rejected out of range score");
                self.transit(key, TestcaseProgress::fail);
            }
            Some(JobEvent::Failed { message }) => {
                warn!(%key, %message, "testcase evaluation failed");
                self.transit(key, TestcaseProgress::fail);
            }
            None => {
                warn!(%key, "job dropped without a report");
                self.transit(key, TestcaseProgress::fail);
            }
        }
    }

    /// Dispatches every testcase, waits for all of them and sends the outcome.
    pub async fn run(mut self) {
        self.dispatch().await;
        self.finish();
    }

    #[tracing::instrument(skip(self))]
    async fn dispatch(&mut self) {
        let total = self.tree.total();
        info!(total, "evaluation started");
        self.publish().await;

        let keys: Vec<TestcaseKey> = self.tree.keys().collect();
        let mut pending = FuturesUnordered::new();

        for key in keys {
            let config = self.job_config(key);
            match self.queue.enqueue(config).await {
                Ok(handle) => {
                    self.transit(key, TestcaseProgress::queue);
                    pending.push(handle.wait().map(move |event| (key, event)));
                }
                Err(err) => {
                    error!(%key, "failed to enqueue testcase: {:?}", err);
                    self.transit(key, TestcaseProgress::fail);
                }
            }
            self.publish().await;
        }

        while let Some((key, event)) = pending.next().await {
            self.handle(key, event);
            self.publish().await;
        }
    }

    fn outcome(&mut self) -> Outcome {
        let stale: Vec<TestcaseKey> = self
            .tree
            .keys()
            .filter(|&key| self.tree.get(key).map_or(false, |tc| !tc.state.is_terminal()))
            .collect();
        for key in stale {
            warn!(%key, "testcase left unresolved");
            self.transit(key, TestcaseProgress::fail);
        }

        let total = self.tree.total();
        let failed = self.tree.failed();
        if failed > 0 {
            return Err(EvaluationError::TestcasesFailed { failed, total });
        }

        let intra = self.config.intra_subtask_aggregation;
        let inter = self.config.inter_subtask_aggregation;
        match (
            self.tree.score(intra, inter),
            self.tree.max_score(intra, inter),
        ) {
            (Some(score), Some(max_score)) => Ok(EvaluationReport {
                score,
                max_score,
                subtasks: self.tree.subtasks.clone(),
            }),
            _ => Err(EvaluationError::Rejected {
                message: "empty evaluation structure".into(),
            }),
        }
    }

    fn finish(&mut self) {
        let outcome = self.outcome();
        match &outcome {
            Ok(report) => info!(score = report.score, max_score = report.max_score, "evaluation finished"),
            Err(err) => info!("evaluation failed: {}", err),
        }
        match self.done.take() {
            None => warn!("evaluation outcome already sent"),
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    warn!("evaluation outcome receiver dropped");
                }
            }
        }
    }
}

/// Runs `config` to completion. The outer error is a configuration error
/// detected before dispatch.
pub async fn evaluate(
    config: EvaluationConfig,
    queue: Arc<dyn JobQueue>,
    progress: Arc<dyn ProgressSink>,
    options: EvaluatorOptions,
) -> Result<Outcome, ConfigError> {
    let (evaluator, rx) = BatchEvaluator::new(config, queue, progress, options)?;
    evaluator.run().await;
    Ok(rx.await.unwrap_or_else(|_| {
        Err(EvaluationError::Rejected {
            message: "evaluation aborted".into(),
        })
    }))
}
