use crate::aggregation::Aggregation;
use crate::config::SubtaskSpec;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of one testcase evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestcaseResult {
    /// in `[0, 1]`
    pub score: f64,
    pub message: String,
    /// seconds, `None` when the run stage was never reached
    pub elapsed_time: Option<f64>,
    /// MiB, `None` when the run stage was never reached
    pub memory_peak: Option<f64>,
}

impl TestcaseResult {
    pub fn new(score: f64, message: impl Into<String>) -> Self {
        Self {
            score,
            message: message.into(),
            elapsed_time: None,
            memory_peak: None,
        }
    }

    pub fn with_usage(mut self, elapsed_time: f64, memory_peak: f64) -> Self {
        self.elapsed_time = Some(elapsed_time);
        self.memory_peak = Some(memory_peak);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.score.is_finite() && (0.0..=1.0).contains(&self.score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestcaseState {
    Unknown,
    Queued,
    Completed,
    Failed,
}

impl TestcaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TestcaseState::Completed | TestcaseState::Failed)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid testcase transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: TestcaseState,
    pub to: TestcaseState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestcaseProgress {
    pub state: TestcaseState,
    pub score: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_peak: Option<f64>,
}

impl Default for TestcaseProgress {
    fn default() -> Self {
        Self {
            state: TestcaseState::Unknown,
            score: 0.0,
            message: String::new(),
            elapsed_time: None,
            memory_peak: None,
        }
    }
}

impl TestcaseProgress {
    fn transit(&mut self, to: TestcaseState) -> Result<(), InvalidTransition> {
        let from = self.state;
        let ok = match to {
            TestcaseState::Queued => from == TestcaseState::Unknown,
            TestcaseState::Completed => from == TestcaseState::Queued,
            TestcaseState::Failed => !from.is_terminal(),
            TestcaseState::Unknown => false,
        };
        if !ok {
            return Err(InvalidTransition { from, to });
        }
        self.state = to;
        Ok(())
    }

    pub fn queue(&mut self) -> Result<(), InvalidTransition> {
        self.transit(TestcaseState::Queued)
    }

    pub fn complete(&mut self, result: TestcaseResult) -> Result<(), InvalidTransition> {
        self.transit(TestcaseState::Completed)?;
        self.score = result.score;
        self.message = result.message;
        self.elapsed_time = result.elapsed_time;
        self.memory_peak = result.memory_peak;
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.transit(TestcaseState::Failed)?;
        self.score = 0.0;
        Ok(())
    }
}

/// 1-based position of a testcase in the evaluation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestcaseKey {
    pub subtask: usize,
    pub testcase: usize,
}

impl fmt::Display for TestcaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subtask, self.testcase)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskProgress {
    pub testcases: Vec<TestcaseProgress>,
}

/// Progress of every testcase, grouped by subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTree {
    pub subtasks: Vec<SubtaskProgress>,
}

impl ProgressTree {
    pub fn new(structure: &[SubtaskSpec]) -> Self {
        let subtasks = structure
            .iter()
            .map(|spec| SubtaskProgress {
                testcases: vec![TestcaseProgress::default(); spec.testcase_count as usize],
            })
            .collect();
        Self { subtasks }
    }

    pub fn keys(&self) -> impl Iterator<Item = TestcaseKey> + '_ {
        self.subtasks.iter().enumerate().flat_map(|(i, s)| {
            (0..s.testcases.len()).map(move |j| TestcaseKey {
                subtask: i + 1,
                testcase: j + 1,
            })
        })
    }

    pub fn get(&self, key: TestcaseKey) -> Option<&TestcaseProgress> {
        let i = key.subtask.checked_sub(1)?;
        let j = key.testcase.checked_sub(1)?;
        self.subtasks.get(i)?.testcases.get(j)
    }

    pub fn get_mut(&mut self, key: TestcaseKey) -> Option<&mut TestcaseProgress> {
        let i = key.subtask.checked_sub(1)?;
        let j = key.testcase.checked_sub(1)?;
        self.subtasks.get_mut(i)?.testcases.get_mut(j)
    }

    fn testcases(&self) -> impl Iterator<Item = &TestcaseProgress> {
        self.subtasks.iter().flat_map(|s| s.testcases.iter())
    }

    pub fn total(&self) -> usize {
        self.subtasks.iter().map(|s| s.testcases.len()).sum()
    }

    pub fn resolved(&self) -> usize {
        self.testcases().filter(|t| t.state.is_terminal()).count()
    }

    pub fn failed(&self) -> usize {
        self.testcases()
            .filter(|t| t.state == TestcaseState::Failed)
            .count()
    }

    pub fn is_done(&self) -> bool {
        self.testcases().all(|t| t.state.is_terminal())
    }

    /// Aggregates in tree order. `None` if a subtask is empty or the tree is.
    pub fn score(&self, intra: Aggregation, inter: Aggregation) -> Option<f64> {
        self.aggregate(intra, inter, |t| t.score)
    }

    /// The score obtained when every testcase scores 1.
    pub fn max_score(&self, intra: Aggregation, inter: Aggregation) -> Option<f64> {
        self.aggregate(intra, inter, |_| 1.0)
    }

    fn aggregate(
        &self,
        intra: Aggregation,
        inter: Aggregation,
        f: impl Fn(&TestcaseProgress) -> f64,
    ) -> Option<f64> {
        let mut subtask_scores = Vec::with_capacity(self.subtasks.len());
        for subtask in &self.subtasks {
            subtask_scores.push(intra.apply(subtask.testcases.iter().map(&f))?);
        }
        inter.apply(subtask_scores)
    }
}

/// Final result of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub score: f64,
    pub max_score: f64,
    pub subtasks: Vec<SubtaskProgress>,
}
