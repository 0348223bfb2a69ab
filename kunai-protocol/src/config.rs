use crate::aggregation::Aggregation;
use crate::error::ConfigError;
use crate::language::Language;

use serde::{Deserialize, Serialize};
use validator::Validate;

const PLACEHOLDER: &str = "%d";

/// Configuration of one submission evaluation.
///
/// Subtask `i` (1-based) holds `evaluation_structure[i - 1].testcase_count`
/// testcases. The score of subtask `i` is `intra(S_i1, ..., S_iN)` and the
/// final score is `inter(X_1, ..., X_M)`.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EvaluationConfig {
    #[validate(length(min = 1))]
    pub submission_file_uri: String,

    #[validate(length(min = 1))]
    pub tc_input_file_uri_schema: String,

    #[validate(length(min = 1))]
    pub tc_output_file_uri_schema: String,

    #[validate(length(min = 1))]
    pub evaluation_structure: Vec<SubtaskSpec>,

    /// seconds
    pub time_limit: f64,

    /// MiB
    pub memory_limit: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_language: Option<Language>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grader_source_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker_source_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker_language: Option<Language>,

    #[serde(default)]
    pub intra_subtask_aggregation: Aggregation,

    #[serde(default)]
    pub inter_subtask_aggregation: Aggregation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubtaskSpec {
    pub testcase_count: u32,

    /// Parsed and validated, not applied to the score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_multiplier: Option<f64>,
}

/// Configuration of one testcase job.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestcaseConfig {
    #[validate(length(min = 1))]
    pub submission_file_uri: String,

    #[validate(length(min = 1))]
    pub tc_input_file_uri: String,

    #[validate(length(min = 1))]
    pub tc_output_file_uri: String,

    /// seconds
    pub time_limit: f64,

    /// MiB
    pub memory_limit: f64,

    /// seconds, compilation and checking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_time_limit: Option<f64>,

    /// MiB, compilation and checking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_memory_limit: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_language: Option<Language>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grader_source_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker_source_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker_language: Option<Language>,
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn check_schema(field: &'static str, schema: &str) -> Result<(), ConfigError> {
    if schema.matches(PLACEHOLDER).count() >= 2 {
        Ok(())
    } else {
        Err(ConfigError::UriSchema {
            field,
            schema: schema.to_owned(),
        })
    }
}

/// Substitutes the first two `%d` placeholders of `schema`.
pub fn format_uri(schema: &str, subtask: usize, testcase: usize) -> String {
    schema
        .replacen(PLACEHOLDER, &subtask.to_string(), 1)
        .replacen(PLACEHOLDER, &testcase.to_string(), 1)
}

/// Resolves an explicit language or guesses it from the source uri.
pub fn resolve_language(explicit: Option<Language>, uri: &str) -> Result<Language, ConfigError> {
    match explicit {
        Some(lang) => Ok(lang),
        None => Language::from_extension(uri).ok_or_else(|| ConfigError::UnknownLanguage {
            uri: uri.to_owned(),
        }),
    }
}

impl EvaluationConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        check_schema("tcInputFileUriSchema", &self.tc_input_file_uri_schema)?;
        check_schema("tcOutputFileUriSchema", &self.tc_output_file_uri_schema)?;
        check_positive("timeLimit", self.time_limit)?;
        check_positive("memoryLimit", self.memory_limit)?;

        for (idx, subtask) in self.evaluation_structure.iter().enumerate() {
            if subtask.testcase_count == 0 {
                return Err(ConfigError::EmptySubtask { subtask: idx + 1 });
            }
            if let Some(value) = subtask.score_multiplier {
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigError::ScoreMultiplier {
                        subtask: idx + 1,
                        value,
                    });
                }
            }
        }

        resolve_language(self.submission_language, &self.submission_file_uri)?;
        if let Some(ref checker) = self.checker_source_uri {
            resolve_language(self.checker_language, checker)?;
        }

        Ok(())
    }

    pub fn testcase_total(&self) -> usize {
        self.evaluation_structure
            .iter()
            .map(|s| s.testcase_count as usize)
            .sum()
    }

    /// Builds the job configuration of testcase `(subtask, testcase)`, both 1-based.
    pub fn testcase(&self, subtask: usize, testcase: usize) -> TestcaseConfig {
        TestcaseConfig {
            submission_file_uri: self.submission_file_uri.clone(),
            tc_input_file_uri: format_uri(&self.tc_input_file_uri_schema, subtask, testcase),
            tc_output_file_uri: format_uri(&self.tc_output_file_uri_schema, subtask, testcase),
            time_limit: self.time_limit,
            memory_limit: self.memory_limit,
            internal_time_limit: None,
            internal_memory_limit: None,
            submission_language: self.submission_language,
            grader_source_uri: self.grader_source_uri.clone(),
            checker_source_uri: self.checker_source_uri.clone(),
            checker_language: self.checker_language,
        }
    }
}

impl TestcaseConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        check_positive("timeLimit", self.time_limit)?;
        check_positive("memoryLimit", self.memory_limit)?;
        if let Some(value) = self.internal_time_limit {
            check_positive("internalTimeLimit", value)?;
        }
        if let Some(value) = self.internal_memory_limit {
            check_positive("internalMemoryLimit", value)?;
        }

        resolve_language(self.submission_language, &self.submission_file_uri)?;
        if let Some(ref checker) = self.checker_source_uri {
            resolve_language(self.checker_language, checker)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn task() -> serde_json::Value {
        json!({
            "submissionFileUri": "kunai://tasks/aplusb/1/solution-ok.cpp",
            "tcInputFileUriSchema": "kunai://tasks/aplusb/1/input%d.%d.txt",
            "tcOutputFileUriSchema": "kunai://tasks/aplusb/1/output%d.%d.txt",
            "checkerSourceUri": "kunai://tasks/aplusb/1/checker.cpp",
            "intraSubtaskAggregation": "sum",
            "interSubtaskAggregation": "sum",
            "evaluationStructure": [
                { "testcaseCount": 4 },
                { "testcaseCount": 3, "scoreMultiplier": 1.5 },
                { "testcaseCount": 2 }
            ],
            "timeLimit": 1,
            "memoryLimit": 256
        })
    }

    fn parse(value: serde_json::Value) -> Result<EvaluationConfig, ConfigError> {
        EvaluationConfig::from_json(&value.to_string())
    }

    #[test]
    fn parse_full_config() {
        let config = parse(task()).unwrap();
        assert_eq!(config.evaluation_structure.len(), 3);
        assert_eq!(config.testcase_total(), 9);
        assert_eq!(config.evaluation_structure[1].score_multiplier, Some(1.5));
        assert_eq!(config.intra_subtask_aggregation, Aggregation::Sum);
    }

    #[test]
    fn aggregation_defaults_to_sum() {
        let mut value = task();
        let obj = value.as_object_mut().unwrap();
        obj.remove("intraSubtaskAggregation");
        obj.remove("interSubtaskAggregation");
        let config = parse(value).unwrap();
        assert_eq!(config.intra_subtask_aggregation, Aggregation::Sum);
        assert_eq!(config.inter_subtask_aggregation, Aggregation::Sum);
    }

    #[test]
    fn missing_output_schema_is_rejected() {
        let mut value = task();
        value.as_object_mut().unwrap().remove("tcOutputFileUriSchema");
        let err = parse(value).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
        assert!(err.to_string().contains("tcOutputFileUriSchema"));
    }

    #[test]
    fn unknown_aggregation_is_rejected() {
        let mut value = task();
        value["intraSubtaskAggregation"] = json!("avg");
        assert!(matches!(parse(value), Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn non_integer_testcase_count_is_rejected() {
        let mut value = task();
        value["evaluationStructure"][0]["testcaseCount"] = json!(2.5);
        assert!(matches!(parse(value), Err(ConfigError::Malformed(_))));

        let mut value = task();
        value["evaluationStructure"][0]["testcaseCount"] = json!(-1);
        assert!(matches!(parse(value), Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn legacy_structure_shape_is_rejected() {
        let mut value = task();
        value["evaluationStructure"] = json!([4, 3, 2]);
        assert!(matches!(parse(value), Err(ConfigError::Malformed(_))));

        let mut value = task();
        value["evaluationStructure"] = json!([{ "nTestcases": 4 }]);
        assert!(matches!(parse(value), Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn empty_structure_is_rejected() {
        let mut value = task();
        value["evaluationStructure"] = json!([]);
        assert!(matches!(parse(value), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_subtask_is_rejected() {
        let mut value = task();
        value["evaluationStructure"][2]["testcaseCount"] = json!(0);
        match parse(value) {
            Err(ConfigError::EmptySubtask { subtask }) => assert_eq!(subtask, 3),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn limits_must_be_positive() {
        let mut value = task();
        value["timeLimit"] = json!(-1.0);
        assert!(matches!(
            parse(value),
            Err(ConfigError::NotPositive { field: "timeLimit", .. })
        ));

        let mut value = task();
        value["memoryLimit"] = json!(0);
        assert!(matches!(
            parse(value),
            Err(ConfigError::NotPositive { field: "memoryLimit", .. })
        ));
    }

    #[test]
    fn schema_needs_two_placeholders() {
        let mut value = task();
        value["tcInputFileUriSchema"] = json!("kunai://tasks/aplusb/1/input%d.txt");
        assert!(matches!(
            parse(value),
            Err(ConfigError::UriSchema { field: "tcInputFileUriSchema", .. })
        ));
    }

    #[test]
    fn unknown_submission_extension_is_a_config_error() {
        let mut value = task();
        value["submissionFileUri"] = json!("kunai://tasks/aplusb/1/solution.rs");
        assert!(matches!(parse(value), Err(ConfigError::UnknownLanguage { .. })));

        let mut value = task();
        value["submissionFileUri"] = json!("kunai://tasks/aplusb/1/solution.rs");
        value["submissionLanguage"] = json!("GCC_CXX");
        assert!(parse(value).is_ok());
    }

    #[test]
    fn testcase_uris_are_substituted() {
        let config = parse(task()).unwrap();
        let tc = config.testcase(2, 3);
        assert_eq!(tc.tc_input_file_uri, "kunai://tasks/aplusb/1/input2.3.txt");
        assert_eq!(tc.tc_output_file_uri, "kunai://tasks/aplusb/1/output2.3.txt");
        assert_eq!(tc.submission_file_uri, config.submission_file_uri);
        assert_eq!(tc.checker_source_uri, config.checker_source_uri);
        assert!(tc.check().is_ok());
    }

    #[test]
    fn testcase_config_round_trips_through_json() {
        let config = parse(task()).unwrap();
        let mut tc = config.testcase(1, 1);
        tc.internal_time_limit = Some(10.0);
        let json = serde_json::to_string(&tc).unwrap();
        assert!(json.contains("\"internalTimeLimit\":10.0"));
        let back = TestcaseConfig::from_json(&json).unwrap();
        assert_eq!(back.tc_input_file_uri, tc.tc_input_file_uri);
        assert_eq!(back.internal_time_limit, Some(10.0));
    }

    #[test]
    fn testcase_config_requires_input() {
        let json = json!({
            "submissionFileUri": "kunai://source.cpp",
            "tcOutputFileUri": "kunai://output.txt",
            "timeLimit": 1.0,
            "memoryLimit": 256
        });
        let err = TestcaseConfig::from_json(&json.to_string()).unwrap_err();
        assert!(err.to_string().contains("tcInputFileUri"));
    }
}
