//! Dynamic role assignment

use serde::Serialize;
use tracing::{debug, info};

use crate::config::SwarmConfig;
use crate::heuristics::{derive_seed, SeededUniform, SharedHeuristic};
use crate::registry::WorkerRegistry;
use crate::state::types::{SwarmRole, Worker, WorkerId, COLLABORATION_METRIC};

/// At most this many leaders among the rest of the swarm
const MAX_LEADERS: usize = 2;

/// Capability scores a role decision is based on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleScores {
    pub leadership: f64,
    pub innovation: f64,
    pub specialization: f64,
    pub coordination: f64,
}

/// A role reassignment that took effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleChange {
    pub worker_id: WorkerId,
    pub from: SwarmRole,
    pub to: SwarmRole,
}

/// Assigns roles from worker capabilities and the roles already taken
pub struct RoleManager {
    innovation: SharedHeuristic,
    reassign_threshold: f64,
}

impl RoleManager {
    pub fn new(innovation: SharedHeuristic, reassign_threshold: f64) -> Self {
        Self {
            innovation,
            reassign_threshold,
        }
    }

    /// Innovation drawn uniformly from 0.3 to 0.9
    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(
            SeededUniform::new(0.3, 0.9, derive_seed(config.seed, 4)).shared(),
            config.reassign_threshold,
        )
    }

    pub fn with_innovation(mut self, innovation: SharedHeuristic) -> Self {
        self.innovation = innovation;
        self
    }

    pub fn scores(&self, worker: &Worker) -> RoleScores {
        RoleScores {
            leadership: worker.metric(COLLABORATION_METRIC),
            innovation: self.innovation.sample(worker.id.as_str()),
            specialization: if worker.is_general() { 0.3 } else { 0.9 },
            coordination: worker.accuracy(),
        }
    }

    /// Pick a role for `worker` given the other workers in the swarm
    pub fn assign_role(&self, worker: &Worker, others: &[Worker]) -> SwarmRole {
        let scores = self.scores(worker);
        let leaders = others
            .iter()
            .filter(|other| other.id != worker.id && other.role == SwarmRole::Leader)
            .count();

        let role = if scores.leadership > 0.8 && leaders < MAX_LEADERS {
            SwarmRole::Leader
        } else if scores.innovation > 0.8 {
            SwarmRole::Innovator
        } else if scores.specialization > 0.8 {
            SwarmRole::Specialist
        } else if scores.coordination > 0.7 {
            SwarmRole::Coordinator
        } else {
            SwarmRole::Worker
        };

        debug!(worker_id = %worker.id, role = %role, leaders, "Role evaluated");
        role
    }

    /// Re-evaluate underperforming workers against the swarm as it stood when
    /// the call started. Returns the roles that changed.
    pub fn reassign_roles(&self, registry: &mut WorkerRegistry) -> Vec<RoleChange> {
        let snapshot = registry.snapshot();
        let mut changes = Vec::new();

        for worker in snapshot
            .iter()
            .filter(|w| w.mean_metric() < self.reassign_threshold)
        {
            let role = self.assign_role(worker, &snapshot);
            if role == worker.role {
                continue;
            }
            if registry.set_role(&worker.id, role).is_ok() {
                changes.push(RoleChange {
                    worker_id: worker.id.clone(),
                    from: worker.role,
                    to: role,
                });
            }
        }

        if !changes.is_empty() {
            info!(changes = changes.len(), "Roles reassigned");
        }
        changes
    }
}
