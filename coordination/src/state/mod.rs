//! Swarm state: core data types and the finished-task archive
//!
//! Everything here is in-memory. The coordinator wraps the mutable parts
//! (registry, metrics, archive) in locks so each record has a single writer.
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordination::state::{Task, Requirements, TaskStatus};
//!
//! let mut task = Task::new("Summarise logs", Requirements::new(), 0.4)?;
//! task.transition(TaskStatus::Running)?;
//! ```

pub mod archive;
pub mod types;

pub use archive::TaskArchive;
pub use types::{
    Bid, Requirements, StateError, StateResult, Subtask, SubtaskFault, SubtaskId,
    SubtaskOutcome, SwarmMetrics, SwarmRole, Task, TaskId, TaskResult, TaskStatus, Worker,
    WorkerId, WorkerSnapshot, ACCURACY_METRIC, COLLABORATION_METRIC, DEFAULT_METRIC,
    GENERAL_SPECIALIZATION, SPECIALIZATION_KEY,
};
