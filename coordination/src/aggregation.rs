//! Merge subtask outcomes into a task result

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;

use crate::state::types::{SubtaskId, SubtaskOutcome, Task, TaskResult, WorkerId};

/// Summarize outcomes for `task`. Order-independent: outcomes are keyed by
/// subtask id.
pub fn aggregate(outcomes: BTreeMap<SubtaskId, SubtaskOutcome>, task: &Task) -> TaskResult {
    let successful_subtasks = outcomes.values().filter(|o| o.is_success()).count();
    let failed_subtasks = outcomes.len() - successful_subtasks;

    let total_elapsed: Duration = outcomes.values().map(SubtaskOutcome::elapsed).sum();

    let confidences: Vec<f64> = outcomes.values().filter_map(SubtaskOutcome::confidence).collect();
    let mean_confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    let participating_workers: BTreeSet<WorkerId> = outcomes
        .values()
        .filter_map(|o| o.worker_id().cloned())
        .collect();

    TaskResult {
        task_id: task.id.clone(),
        success: successful_subtasks > failed_subtasks,
        outcomes,
        successful_subtasks,
        failed_subtasks,
        total_elapsed,
        mean_confidence,
        participating_workers,
        completed_at: Utc::now(),
    }
}
