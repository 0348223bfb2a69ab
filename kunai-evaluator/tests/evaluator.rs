mod common;

use common::{complete, MockQueue, RecordingSink};

use kunai_evaluator::evaluator::{BatchEvaluator, EvaluatorOptions};
use kunai_protocol::{Aggregation, ConfigError, EvaluationConfig, EvaluationError, JobEvent};
use kunai_protocol::{TestcaseResult, TestcaseState};

use serde_json::json;

const VECTOR: [f64; 9] = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0];

fn start(
    config: EvaluationConfig,
    queue: &std::sync::Arc<MockQueue>,
    sink: &std::sync::Arc<RecordingSink>,
) -> (
    tokio::task::JoinHandle<()>,
    tokio::sync::oneshot::Receiver<kunai_evaluator::evaluator::Outcome>,
) {
    common::init();
    let (evaluator, rx) =
        BatchEvaluator::new(config, queue.clone(), sink.clone(), EvaluatorOptions::default())
            .unwrap();
    (tokio::spawn(evaluator.run()), rx)
}

#[tokio::test]
async fn dispatches_one_job_per_testcase() {
    let queue = MockQueue::new();
    let sink = RecordingSink::new();
    let (run, rx) = start(common::evaluation(&[4, 3, 2]), &queue, &sink);

    queue.wait_for(9).await;
    let inputs: Vec<String> = queue
        .jobs()
        .into_iter()
        .map(|job| job.tc_input_file_uri)
        .collect();
    assert_eq!(inputs.len(), 9);
    assert_eq!(inputs[0], "kunai://task/1/input1.txt");
    assert_eq!(inputs[3], "kunai://task/1/input4.txt");
    assert_eq!(inputs[4], "kunai://task/2/input1.txt");
    assert_eq!(inputs[8], "kunai://task/3/input2.txt");

    for position in 0..9 {
        queue.resolve(position, complete(1.0));
    }
    run.await.unwrap();

    let report = rx.await.unwrap().unwrap();
    assert_eq!(report.score, 9.0);
    assert_eq!(report.max_score, 9.0);
    assert_eq!(queue.jobs().len(), 9);
}

#[tokio::test]
async fn sum_of_sums() {
    let queue = MockQueue::new();
    let sink = RecordingSink::new();
    let (run, rx) = start(common::evaluation(&[4, 3, 2]), &queue, &sink);

    queue.wait_for(9).await;
    for (position, &score) in VECTOR.iter().enumerate() {
        queue.resolve(position, complete(score));
    }
    run.await.unwrap();

    let report = rx.await.unwrap().unwrap();
    assert_eq!(report.score, 8.0);
    assert_eq!(report.max_score, 9.0);
    assert_eq!(report.subtasks[1].testcases[2].message, "Wrong answer");
    assert_eq!(report.subtasks[1].testcases[2].state, TestcaseState::Completed);
}

#[tokio::test]
async fn arrival_order_does_not_matter() {
    let orders: [[usize; 9]; 3] = [
        [0, 1, 2, 3, 4, 5, 6, 7, 8],
        [8, 7, 6, 5, 4, 3, 2, 1, 0],
        [6, 2, 8, 0, 4, 1, 7, 3, 5],
    ];
    for order in orders.iter() {
        let mut config = common::evaluation(&[4, 3, 2]);
        config.intra_subtask_aggregation = Aggregation::Min;
        config.inter_subtask_aggregation = Aggregation::Sum;

        let queue = MockQueue::new();
        let sink = RecordingSink::new();
        let (run, rx) = start(config, &queue, &sink);

        queue.wait_for(9).await;
        for &position in order.iter() {
            queue.resolve(position, complete(VECTOR[position]));
        }
        run.await.unwrap();

        let report = rx.await.unwrap().unwrap();
        assert_eq!(report.score, 2.0, "order = {:?}", order);
        assert_eq!(report.max_score, 3.0);
    }
}

#[tokio::test]
async fn failed_testcase_fails_the_evaluation() {
    let queue = MockQueue::new();
    let sink = RecordingSink::new();
    let (run, rx) = start(common::evaluation(&[4, 3, 2]), &queue, &sink);

    queue.wait_for(9).await;
    for position in 0..9 {
        let event = if position == 4 {
            JobEvent::Failed {
                message: "failed to create sandbox".into(),
            }
        } else {
            complete(1.0)
        };
        queue.resolve(position, event);
    }
    run.await.unwrap();

    let outcome = rx.await.unwrap();
    assert_eq!(
        outcome,
        Err(EvaluationError::TestcasesFailed {
            failed: 1,
            total: 9
        })
    );

    let last = sink.last();
    assert_eq!(last.current, 9);
    assert!(last.payload.contains("Evaluation failed"));
    assert!(!last.payload.contains("failed to create sandbox"));
}

#[tokio::test]
async fn dropped_job_counts_as_failed() {
    let queue = MockQueue::new();
    let sink = RecordingSink::new();
    let (run, rx) = start(common::evaluation(&[2]), &queue, &sink);

    queue.wait_for(2).await;
    queue.resolve(0, complete(1.0));
    queue.forget(1);
    run.await.unwrap();

    assert_eq!(
        rx.await.unwrap(),
        Err(EvaluationError::TestcasesFailed {
            failed: 1,
            total: 2
        })
    );
}

#[tokio::test]
async fn enqueue_failure_marks_the_testcase_failed() {
    let queue = MockQueue::rejecting(&[1]);
    let sink = RecordingSink::new();
    let (run, rx) = start(common::evaluation(&[3]), &queue, &sink);

    queue.wait_for(3).await;
    queue.resolve(0, complete(1.0));
    queue.resolve(2, complete(1.0));
    run.await.unwrap();

    assert_eq!(
        rx.await.unwrap(),
        Err(EvaluationError::TestcasesFailed {
            failed: 1,
            total: 3
        })
    );
}

#[tokio::test]
async fn out_of_range_score_counts_as_failed() {
    let queue = MockQueue::new();
    let sink = RecordingSink::new();
    let (run, rx) = start(common::evaluation(&[2]), &queue, &sink);

    queue.wait_for(2).await;
    queue.resolve(0, complete(1.0));
    queue.resolve(1, JobEvent::Complete(TestcaseResult::new(1.5, "Correct answer")));
    run.await.unwrap();

    assert!(matches!(
        rx.await.unwrap(),
        Err(EvaluationError::TestcasesFailed { failed: 1, .. })
    ));
}

#[tokio::test]
async fn missing_output_schema_dispatches_nothing() {
    common::init();
    let value = json!({
        "submissionFileUri": "kunai://task/solution.py",
        "tcInputFileUriSchema": "kunai://task/%d/input%d.txt",
        "evaluationStructure": [{ "testcaseCount": 2 }],
        "timeLimit": 1.0,
        "memoryLimit": 256.0,
    });
    assert!(matches!(
        EvaluationConfig::from_json(&value.to_string()),
        Err(ConfigError::Malformed(_))
    ));

    let mut config = common::evaluation(&[2]);
    config.tc_output_file_uri_schema = String::new();
    let queue = MockQueue::new();
    let sink = RecordingSink::new();
    let result = BatchEvaluator::new(config, queue.clone(), sink.clone(), Default::default());
    assert!(result.is_err());
    assert!(queue.jobs().is_empty());
    assert!(sink.published().is_empty());
}

#[tokio::test]
async fn progress_is_published_after_every_transition() {
    let queue = MockQueue::new();
    let sink = RecordingSink::new();
    let (run, rx) = start(common::evaluation(&[2, 1]), &queue, &sink);

    queue.wait_for(3).await;
    for position in 0..3 {
        queue.resolve(position, complete(1.0));
    }
    run.await.unwrap();
    rx.await.unwrap().unwrap();

    let published = sink.published();
    // initial tree, one per enqueue, one per report
    assert_eq!(published.len(), 1 + 3 + 3);
    assert!(published.iter().all(|p| p.total == 3));
    assert_eq!(published[0].current, 0);
    assert!(published[0].payload.contains("Connecting..."));
    assert!(published[3].payload.contains("In queue"));
    assert_eq!(published.last().unwrap().current, 3);
    assert!(published
        .windows(2)
        .all(|w| w[0].current <= w[1].current));
}
