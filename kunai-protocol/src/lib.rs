#![deny(clippy::all)]

pub mod aggregation;
pub mod config;
pub mod error;
pub mod job;
pub mod language;
pub mod result;

pub use self::aggregation::Aggregation;
pub use self::config::{EvaluationConfig, SubtaskSpec, TestcaseConfig};
pub use self::error::{ConfigError, EvaluationError};
pub use self::job::{JobEvent, JobReport, ProgressUpdate, QueuedJob};
pub use self::language::Language;
pub use self::result::{
    EvaluationReport, ProgressTree, SubtaskProgress, TestcaseKey, TestcaseProgress,
    TestcaseResult, TestcaseState,
};
