#![allow(dead_code)]

use kunai_evaluator::exec::ExecutorOptions;
use kunai_evaluator::queue::{JobHandle, JobQueue, ProgressSink, TestcaseEvent};
use kunai_evaluator::store::LocalFileStore;
use kunai_evaluator::Config;
use kunai_protocol::{EvaluationConfig, JobEvent, TestcaseConfig, TestcaseResult};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::time;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(kunai_utils::tracing::setup_tracing);
}

/// Queue recording every job. Handles are resolved by the test, in any order.
#[derive(Default)]
pub struct MockQueue {
    jobs: Mutex<Vec<TestcaseConfig>>,
    pending: Mutex<Vec<Option<oneshot::Sender<TestcaseEvent>>>>,
    reject: Vec<usize>,
}

impl MockQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the enqueue attempts at the given 0-based positions.
    pub fn rejecting(positions: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            reject: positions.to_vec(),
            ..Self::default()
        })
    }

    pub fn jobs(&self) -> Vec<TestcaseConfig> {
        self.jobs.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, n: usize) {
        for _ in 0..500 {
            if self.jobs.lock().unwrap().len() >= n {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} jobs", n);
    }

    pub fn resolve(&self, position: usize, event: TestcaseEvent) {
        let tx = self.pending.lock().unwrap()[position].take().unwrap();
        tx.send(event).unwrap();
    }

    /// Drops the job without reporting.
    pub fn forget(&self, position: usize) {
        let tx = self.pending.lock().unwrap()[position].take();
        drop(tx);
    }
}

impl JobQueue for MockQueue {
    fn enqueue(&self, config: TestcaseConfig) -> BoxFuture<'_, Result<JobHandle>> {
        let result = {
            let mut jobs = self.jobs.lock().unwrap();
            let mut pending = self.pending.lock().unwrap();
            let position = jobs.len();
            jobs.push(config);
            if self.reject.contains(&position) {
                pending.push(None);
                Err(anyhow::anyhow!("broker unavailable"))
            } else {
                let (tx, rx) = oneshot::channel();
                pending.push(Some(tx));
                Ok(JobHandle::new(rx))
            }
        };
        Box::pin(async move { result })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub current: usize,
    pub total: usize,
    pub payload: String,
}

#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<Published>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn last(&self) -> Published {
        self.published.lock().unwrap().last().cloned().unwrap()
    }
}

impl ProgressSink for RecordingSink {
    fn progress(&self, current: usize, total: usize, payload: String) -> BoxFuture<'_, Result<()>> {
        self.published.lock().unwrap().push(Published {
            current,
            total,
            payload,
        });
        Box::pin(async { Ok(()) })
    }
}

pub fn evaluation(structure: &[u32]) -> EvaluationConfig {
    let structure: Vec<_> = structure
        .iter()
        .map(|&n| json!({ "testcaseCount": n }))
        .collect();
    let value = json!({
        "submissionFileUri": "kunai://task/solution.py",
        "tcInputFileUriSchema": "kunai://task/%d/input%d.txt",
        "tcOutputFileUriSchema": "kunai://task/%d/output%d.txt",
        "evaluationStructure": structure,
        "timeLimit": 1.0,
        "memoryLimit": 256.0,
    });
    EvaluationConfig::from_json(&value.to_string()).unwrap()
}

pub fn complete(score: f64) -> TestcaseEvent {
    let message = if score > 0.0 {
        "Correct answer"
    } else {
        "Wrong answer"
    };
    JobEvent::Complete(TestcaseResult::new(score, message).with_usage(0.01, 1.0))
}

/// A file store and an executor workspace in one scratch directory, run in
/// plain mode. Python sources are run by `/bin/sh`, so tests ship shell
/// scripts as `.py` files.
pub struct Fixture {
    pub tmp: TempDir,
    pub store: LocalFileStore,
    pub options: Arc<ExecutorOptions>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(f: impl FnOnce(&mut Config)) -> Self {
        init();
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.executor.workspace_root = tmp.path().join("work");
        // chroot needs root
        config.executor.isolate = false;
        config.executor.bind_ro.clear();
        config.executor.bind_rw.clear();
        config.toolchain.python3 = "/bin/sh".into();
        f(&mut config);
        let store = LocalFileStore::new(tmp.path().join("store"));
        let options = Arc::new(ExecutorOptions::from_config(&config, 1.0, 1.0));
        Self {
            tmp,
            store,
            options,
        }
    }

    /// Writes `content` to the store under `rel`.
    pub fn put(&self, rel: &str, content: &str) {
        let path = self.store.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Stores the input and expected output of testcase `i.j` of `task`.
    pub fn put_testcase(&self, i: usize, j: usize, input: &str, output: &str) {
        self.put(&format!("task/{}/input{}.txt", i, j), input);
        self.put(&format!("task/{}/output{}.txt", i, j), output);
    }

    pub fn workspace(&self) -> PathBuf {
        self.options.workspace_root.clone()
    }

    pub fn workspace_is_empty(&self) -> bool {
        let root: &Path = &self.options.workspace_root;
        !root.exists() || fs::read_dir(root).unwrap().next().is_none()
    }
}

/// Testcase 1.1 of `task` with the given submission file.
pub fn testcase(submission: &str) -> TestcaseConfig {
    TestcaseConfig {
        submission_file_uri: format!("kunai://task/{}", submission),
        tc_input_file_uri: "kunai://task/1/input1.txt".into(),
        tc_output_file_uri: "kunai://task/1/output1.txt".into(),
        time_limit: 1.0,
        memory_limit: 256.0,
        internal_time_limit: None,
        internal_memory_limit: None,
        submission_language: None,
        grader_source_uri: None,
        checker_source_uri: None,
        checker_language: None,
    }
}

pub const APLUSB_SH: &str = "read a b\necho $((a + b))\n";
