//! Swarm Coordination Library
//!
//! A single-process swarm coordination engine. It manages a pool of
//! autonomous workers, decomposes incoming tasks, assigns subtasks through a
//! competitive auction, executes assignments concurrently, aggregates the
//! partial results, and adapts its own structure (roles, load, topology)
//! from observed performance.
//!
//! # Components
//!
//! - `registry`: worker records and the weighted communication graph
//! - `events`: message bus with routed delivery and bounded history
//! - `decomposer`: complexity-tiered task decomposition
//! - `auction`: capability-scored, cost-minimizing subtask auctions
//! - `execution`: concurrent subtask execution with failure isolation
//! - `aggregation`: subtask outcomes merged into a task result
//! - `consensus`: weighted-majority voting with deadlines
//! - `emergence`: detection of collective performance above baseline
//! - `adaptation`: role reassignment and backlog balancing
//! - `coordinator`: the [`SwarmCoordinator`] caller API
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordination::{Requirements, SwarmConfig, SwarmCoordinator, WorkerSnapshot};
//!
//! let swarm = SwarmCoordinator::new(SwarmConfig::from_env()).shared();
//! swarm.start().await?;
//!
//! swarm.add_worker(WorkerSnapshot::new("data-1", "data")).await?;
//! let result = swarm.submit_task("Summarise logs", Requirements::new(), 0.8, None).await?;
//! println!("{} of {} subtasks succeeded", result.successful_subtasks, result.outcomes.len());
//!
//! swarm.shutdown().await;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod adaptation;
pub mod aggregation;
pub mod auction;
pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod decomposer;
pub mod emergence;
pub mod events;
pub mod execution;
pub mod heuristics;
pub mod registry;
pub mod state;

// Re-export the caller API
pub use coordinator::{
    EvolutionReport, SharedSwarmCoordinator, SwarmCoordinator, SwarmError, SwarmResult,
};

// Re-export configuration
pub use config::{ConfigError, ConfigResult, SwarmConfig};

// Re-export key state types
pub use state::{
    Bid, Requirements, Subtask, SubtaskFault, SubtaskOutcome, SwarmMetrics, SwarmRole, Task,
    TaskResult, TaskStatus, Worker, WorkerId, WorkerSnapshot,
};

// Re-export key messaging types
pub use events::{DeliveryMode, MessageBus, SharedMessageBus, SwarmMessage};

// Re-export extension seams
pub use auction::{CapabilityScorer, DefaultCapabilityScorer};
pub use execution::{Execution, ExecutionError, SimulatedExecutor, SubtaskExecutor};
pub use heuristics::{Fixed, Heuristic, SeededUniform, SharedHeuristic};

// Re-export consensus and adaptation types
pub use adaptation::{LoadBalancer, RoleChange, RoleManager, Transfer};
pub use consensus::{ConsensusEngine, ConsensusError, ConsensusStatus, Proposal, VoteReceipt};
pub use emergence::{EmergenceDetector, EmergencePattern};
pub use registry::{RegistryError, WorkerRegistry};
