use serde::{Deserialize, Serialize};

/// Malformed or inconsistent job configuration. Detected before any work
/// is dispatched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("field `{field}` must be a finite number above 0, found {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("field `{field}` must contain at least two `%d` placeholders: {schema:?}")]
    UriSchema { field: &'static str, schema: String },

    #[error("subtask {subtask} has no testcases")]
    EmptySubtask { subtask: usize },

    #[error("subtask {subtask} has an invalid score multiplier {value}")]
    ScoreMultiplier { subtask: usize, value: f64 },

    #[error("unrecognized file extension of {uri:?}, set the language explicitly")]
    UnknownLanguage { uri: String },
}

/// Terminal failure of a whole evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EvaluationError {
    #[error("{failed} of {total} testcase evaluations failed")]
    TestcasesFailed { failed: usize, total: usize },

    #[error("evaluation rejected: {message}")]
    Rejected { message: String },
}
