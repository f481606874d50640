//! Core types for swarm coordination
//!
//! Workers, tasks, subtasks, bids, outcomes and swarm-wide metrics. These are
//! plain data; the sibling components own the behavior that mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Unique identifier for tasks submitted to the swarm
pub type TaskId = String;

/// Identifier for a subtask, derived from its parent task id
pub type SubtaskId = String;

/// Requirement hints attached to tasks and subtasks
pub type Requirements = BTreeMap<String, String>;

/// Requirement key naming the preferred worker specialization
pub const SPECIALIZATION_KEY: &str = "specialization";

/// Specialization tag of generalist workers
pub const GENERAL_SPECIALIZATION: &str = "general";

/// Metric smoothed after every successful execution
pub const ACCURACY_METRIC: &str = "accuracy";

/// Metric used as the leadership signal
pub const COLLABORATION_METRIC: &str = "collaboration_score";

/// Value assumed for a metric a worker does not report
pub const DEFAULT_METRIC: f64 = 0.5;

/// Error type for state validation
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Complexity must be within [0, 1], got {0}")]
    InvalidComplexity(f64),

    #[error("Metric {metric} of worker {worker_id} is not a finite number")]
    InvalidMetric { worker_id: WorkerId, metric: String },

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Result type for state validation
pub type StateResult<T> = Result<T, StateError>;

/// Worker identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Role a worker plays inside the swarm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmRole {
    Leader,
    Scout,
    #[default]
    Worker,
    Specialist,
    Coordinator,
    Innovator,
}

impl SwarmRole {
    pub fn all() -> &'static [SwarmRole] {
        &[
            SwarmRole::Leader,
            SwarmRole::Scout,
            SwarmRole::Worker,
            SwarmRole::Specialist,
            SwarmRole::Coordinator,
            SwarmRole::Innovator,
        ]
    }
}

impl std::fmt::Display for SwarmRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwarmRole::Leader => write!(f, "leader"),
            SwarmRole::Scout => write!(f, "scout"),
            SwarmRole::Worker => write!(f, "worker"),
            SwarmRole::Specialist => write!(f, "specialist"),
            SwarmRole::Coordinator => write!(f, "coordinator"),
            SwarmRole::Innovator => write!(f, "innovator"),
        }
    }
}

/// Snapshot of an external worker as supplied by its capability provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub specialization: String,
    #[serde(default)]
    pub performance_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub backlog_size: usize,
}

impl WorkerSnapshot {
    pub fn new(id: impl Into<WorkerId>, specialization: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            specialization: specialization.into(),
            performance_metrics: BTreeMap::new(),
            backlog_size: 0,
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.performance_metrics.insert(name.into(), value);
        self
    }

    pub fn with_backlog(mut self, backlog_size: usize) -> Self {
        self.backlog_size = backlog_size;
        self
    }
}

/// A worker registered with the swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub specialization: String,
    /// Named scores, each clamped to [0, 1]
    pub metrics: BTreeMap<String, f64>,
    pub role: SwarmRole,
    /// Pending work items queued against this worker
    pub backlog: usize,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    /// Build a worker from a provider snapshot, clamping metrics into [0, 1].
    pub fn from_snapshot(snapshot: WorkerSnapshot) -> StateResult<Self> {
        let mut metrics = BTreeMap::new();
        for (name, value) in snapshot.performance_metrics {
            if !value.is_finite() {
                return Err(StateError::InvalidMetric {
                    worker_id: snapshot.id,
                    metric: name,
                });
            }
            metrics.insert(name, value.clamp(0.0, 1.0));
        }

        Ok(Self {
            id: snapshot.id,
            specialization: snapshot.specialization,
            metrics,
            role: SwarmRole::default(),
            backlog: snapshot.backlog_size,
            registered_at: Utc::now(),
        })
    }

    /// Metric value, or [`DEFAULT_METRIC`] when the worker does not report it
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(DEFAULT_METRIC)
    }

    pub fn accuracy(&self) -> f64 {
        self.metric(ACCURACY_METRIC)
    }

    /// Mean over all reported metrics
    pub fn mean_metric(&self) -> f64 {
        if self.metrics.is_empty() {
            return DEFAULT_METRIC;
        }
        self.metrics.values().sum::<f64>() / self.metrics.len() as f64
    }

    pub fn set_metric(&mut self, name: impl Into<String>, value: f64) {
        if value.is_finite() {
            self.metrics.insert(name.into(), value.clamp(0.0, 1.0));
        }
    }

    /// Exponential smoothing of accuracy: `0.9 * accuracy + 0.1 * confidence`
    pub fn smooth_accuracy(&mut self, confidence: f64) {
        let updated = 0.9 * self.accuracy() + 0.1 * confidence;
        self.set_metric(ACCURACY_METRIC, updated);
    }

    pub fn is_general(&self) -> bool {
        self.specialization == GENERAL_SPECIALIZATION
    }
}

/// Status of a swarm task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Transitions only move forward; terminal states never change.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A task submitted to the swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub requirements: Requirements,
    /// Drives the decomposition tier
    pub complexity: f64,
    pub deadline: Option<DateTime<Utc>>,
    pub assigned_workers: BTreeSet<WorkerId>,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        description: impl Into<String>,
        requirements: Requirements,
        complexity: f64,
    ) -> StateResult<Self> {
        if !(0.0..=1.0).contains(&complexity) {
            return Err(StateError::InvalidComplexity(complexity));
        }

        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            requirements,
            complexity,
            deadline: None,
            assigned_workers: BTreeSet::new(),
            status: TaskStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Move to `next`, rejecting backwards or repeated transitions
    pub fn transition(&mut self, next: TaskStatus) -> StateResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Attach the aggregated result and move to the matching terminal state
    pub fn finish(&mut self, result: TaskResult) -> StateResult<()> {
        let next = if result.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.transition(next)?;
        self.result = Some(result);
        Ok(())
    }
}

/// A decomposition unit of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub task_id: TaskId,
    pub description: String,
    pub requirements: Requirements,
}

impl Subtask {
    /// Specialization hint, if any
    pub fn specialization(&self) -> Option<&str> {
        self.requirements
            .get(SPECIALIZATION_KEY)
            .map(String::as_str)
    }
}

/// A worker's offer to take a subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub worker_id: WorkerId,
    pub subtask_id: SubtaskId,
    /// Lower is better, never negative
    pub cost: f64,
    pub confidence: f64,
    pub estimated_duration: Duration,
}

/// Why a subtask produced no result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubtaskFault {
    #[error("no capable bidder")]
    BidShortfall,

    #[error("execution fault: {message}")]
    Execution { message: String },

    #[error("timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    #[error("execution unit panicked: {message}")]
    Panicked { message: String },

    #[error("assigned worker is no longer registered")]
    WorkerUnavailable,
}

/// Result of one subtask, keyed by subtask id in aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubtaskOutcome {
    Succeeded {
        subtask_id: SubtaskId,
        worker_id: WorkerId,
        elapsed: Duration,
        confidence: f64,
        output: String,
    },
    Failed {
        subtask_id: SubtaskId,
        worker_id: Option<WorkerId>,
        fault: SubtaskFault,
        elapsed: Duration,
    },
}

impl SubtaskOutcome {
    pub fn subtask_id(&self) -> &str {
        match self {
            SubtaskOutcome::Succeeded { subtask_id, .. } => subtask_id,
            SubtaskOutcome::Failed { subtask_id, .. } => subtask_id,
        }
    }

    pub fn worker_id(&self) -> Option<&WorkerId> {
        match self {
            SubtaskOutcome::Succeeded { worker_id, .. } => Some(worker_id),
            SubtaskOutcome::Failed { worker_id, .. } => worker_id.as_ref(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            SubtaskOutcome::Succeeded { elapsed, .. } => *elapsed,
            SubtaskOutcome::Failed { elapsed, .. } => *elapsed,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            SubtaskOutcome::Succeeded { confidence, .. } => Some(*confidence),
            SubtaskOutcome::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SubtaskOutcome::Succeeded { .. })
    }
}

/// Aggregated result of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    /// More successful subtasks than failed ones
    pub success: bool,
    pub outcomes: BTreeMap<SubtaskId, SubtaskOutcome>,
    pub successful_subtasks: usize,
    pub failed_subtasks: usize,
    /// Sum of per-subtask elapsed time
    pub total_elapsed: Duration,
    /// Mean confidence over successful subtasks, 0.0 when none succeeded
    pub mean_confidence: f64,
    pub participating_workers: BTreeSet<WorkerId>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn failures(&self) -> impl Iterator<Item = &SubtaskOutcome> {
        self.outcomes.values().filter(|o| !o.is_success())
    }
}

/// Swarm-wide performance metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmMetrics {
    pub collective_intelligence: f64,
    pub coordination_efficiency: f64,
    pub task_completion_rate: f64,
    pub emergence_events: u64,
    pub network_density: f64,
    pub tasks_processed: u64,
}

impl SwarmMetrics {
    /// Fold one finished task into the smoothed completion rate and efficiency
    pub fn record_task(&mut self, success: bool, efficiency: f64) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.task_completion_rate = 0.9 * self.task_completion_rate + 0.1 * outcome;
        self.coordination_efficiency =
            0.9 * self.coordination_efficiency + 0.1 * efficiency.clamp(0.0, 1.0);
        self.tasks_processed += 1;
    }
}
