use kunai_protocol::{ProgressTree, TestcaseProgress, TestcaseState};

use std::fmt::Write;

fn message(tc: &TestcaseProgress) -> &str {
    match tc.state {
        TestcaseState::Unknown => "Connecting...",
        TestcaseState::Queued => "In queue",
        TestcaseState::Failed => "Evaluation failed",
        TestcaseState::Completed => &tc.message,
    }
}

fn score(tc: &TestcaseProgress) -> String {
    match tc.state {
        TestcaseState::Completed => format!("{:.2}", tc.score),
        _ => "–".to_owned(),
    }
}

/// Renders the tree as plain text, one block per subtask.
pub fn render(tree: &ProgressTree) -> String {
    let mut out = String::new();
    for (i, subtask) in tree.subtasks.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "Subtask {}", i + 1);
        for (j, tc) in subtask.testcases.iter().enumerate() {
            let _ = writeln!(out, "  Testcase {}  {}  {}", j + 1, message(tc), score(tc));
        }
    }
    out
}
