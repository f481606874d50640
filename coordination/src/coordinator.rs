//! Swarm coordinator - the caller-facing coordination context
//!
//! Owns the worker registry, message bus, auctions, execution, consensus,
//! emergence detection and adaptation components, each behind its own lock,
//! and drives the task pipeline:
//!
//! ```text
//! submit_task ─▶ decompose ─▶ auction ─▶ execute ─▶ aggregate ─▶ metrics
//!                                                              ├─▶ emergence
//!                                                              └─▶ rebalance
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adaptation::{LoadBalancer, RoleChange, RoleManager, Transfer};
use crate::aggregation::aggregate;
use crate::auction::{AuctionCoordinator, SharedCapabilityScorer};
use crate::config::SwarmConfig;
use crate::consensus::{
    wait_for_resolution, ConsensusEngine, ConsensusError, ConsensusStatus, Proposal, Resolution,
    VoteReceipt,
};
use crate::decomposer::decompose;
use crate::emergence::{swarm_baseline, EmergenceDetector, EmergencePattern};
use crate::events::{
    message_types, BusError, DeliveryMode, Mailbox, MessageBus, SharedMessageBus, SwarmMessage,
    COORDINATOR_ID,
};
use crate::execution::{ExecutionCoordinator, SharedExecutor};
use crate::heuristics::SharedHeuristic;
use crate::registry::{RegistryError, SharedWorkerRegistry, WorkerRegistry};
use crate::state::{
    Requirements, StateError, SubtaskFault, SubtaskOutcome, SwarmMetrics, SwarmRole, Task,
    TaskArchive, TaskResult, TaskStatus, Worker, WorkerId, WorkerSnapshot,
};

/// Error type at the coordinator boundary
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Task state error: {0}")]
    State(#[from] StateError),

    #[error("Task {task_id} produced no successful subtasks")]
    NoSuccessfulSubtasks {
        task_id: String,
        result: Box<TaskResult>,
    },
}

/// Result type for coordinator operations
pub type SwarmResult<T> = Result<T, SwarmError>;

/// Shared reference to SwarmCoordinator
pub type SharedSwarmCoordinator = Arc<SwarmCoordinator>;

/// What one `evolve_structure` pass changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvolutionReport {
    /// The communication network was rebuilt from current metrics
    pub restructured: bool,
    pub links: usize,
    pub role_changes: Vec<RoleChange>,
    pub transfers: Vec<Transfer>,
}

/// Central coordination context for a swarm of workers
pub struct SwarmCoordinator {
    config: SwarmConfig,
    registry: SharedWorkerRegistry,
    metrics: RwLock<SwarmMetrics>,
    consensus: Arc<Mutex<ConsensusEngine>>,
    emergence: Mutex<EmergenceDetector>,
    archive: RwLock<TaskArchive>,
    bus: SharedMessageBus,
    auctions: AuctionCoordinator,
    execution: ExecutionCoordinator,
    roles: RoleManager,
    balancer: LoadBalancer,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl SwarmCoordinator {
    /// Create a coordinator with the default (simulated) collaborators
    pub fn new(config: SwarmConfig) -> Self {
        let bus = MessageBus::from_config(&config).shared();

        Self {
            registry: WorkerRegistry::from_config(&config).shared(),
            metrics: RwLock::new(SwarmMetrics::default()),
            consensus: Arc::new(Mutex::new(ConsensusEngine::from_config(&config))),
            emergence: Mutex::new(EmergenceDetector::from_config(&config)),
            archive: RwLock::new(TaskArchive::new(config.archive_capacity)),
            auctions: AuctionCoordinator::from_config(&config).with_bus(Arc::clone(&bus)),
            execution: ExecutionCoordinator::from_config(&config),
            roles: RoleManager::from_config(&config),
            balancer: LoadBalancer::default(),
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
            bus,
            config,
        }
    }

    /// Create a shared reference to this coordinator
    pub fn shared(self) -> SharedSwarmCoordinator {
        Arc::new(self)
    }

    /// Replace the subtask executor
    pub fn with_executor(mut self, executor: SharedExecutor) -> Self {
        self.execution = self.execution.with_executor(executor);
        self
    }

    /// Replace the capability scorer used by auctions
    pub fn with_scorer(mut self, scorer: SharedCapabilityScorer) -> Self {
        self.auctions = self.auctions.with_scorer(scorer);
        self
    }

    /// Replace the bid duration estimate
    pub fn with_duration_estimate(mut self, duration: SharedHeuristic) -> Self {
        self.auctions = self.auctions.with_duration_estimate(duration);
        self
    }

    /// Replace the innovation score used for role assignment
    pub fn with_innovation(mut self, innovation: SharedHeuristic) -> Self {
        self.roles = self.roles.with_innovation(innovation);
        self
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn registry(&self) -> &SharedWorkerRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &SharedMessageBus {
        &self.bus
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the message router and the consensus deadline sweeper.
    ///
    /// A coordinator starts at most once; after `shutdown` it stays stopped.
    pub async fn start(&self) -> SwarmResult<()> {
        let router = self.bus.spawn_router(self.shutdown.clone())?;
        let sweeper = self.spawn_consensus_sweeper();

        let mut background = self.background.lock().await;
        background.push(router);
        background.push(sweeper);

        info!(
            max_workers = self.config.max_workers,
            consensus_deadline_ms = self.config.consensus_deadline_ms,
            "Swarm coordinator started"
        );
        Ok(())
    }

    /// Stop background tasks. The router drains queued messages first.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.bus.close();

        let handles: Vec<JoinHandle<()>> = self.background.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!(stats = ?self.bus.stats(), "Swarm coordinator stopped");
    }

    fn spawn_consensus_sweeper(&self) -> JoinHandle<()> {
        let consensus = Arc::clone(&self.consensus);
        let bus = Arc::clone(&self.bus);
        let shutdown = self.shutdown.clone();
        let period = self.config.consensus_sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = consensus.lock().await.sweep_expired(Utc::now());
                        for resolution in &expired {
                            announce_resolution(&bus, resolution);
                        }
                    }
                }
            }
            debug!("Consensus sweeper stopped");
        })
    }

    // =========================================================================
    // Workers
    // =========================================================================

    /// Register a worker and assign its initial role
    pub async fn add_worker(&self, snapshot: WorkerSnapshot) -> SwarmResult<SwarmRole> {
        let mut worker = Worker::from_snapshot(snapshot)?;
        let worker_id = worker.id.clone();

        let (role, registration) = {
            let mut registry = self.registry.write().await;
            let role = self.roles.assign_role(&worker, &registry.snapshot());
            worker.role = role;
            (role, registry.register(worker)?)
        };

        self.bus.subscribe(&worker_id, message_types::defaults().iter().copied());
        self.refresh_metrics().await;

        info!(
            worker_id = %worker_id,
            role = %role,
            similar_peers = registration.similar_peers.len(),
            repair_links = registration.repair_links,
            "Worker joined swarm"
        );
        self.announce(SwarmMessage::broadcast(
            COORDINATOR_ID,
            message_types::ROLE_CHANGED,
            json!({ "worker_id": worker_id, "role": role }),
        ));
        Ok(role)
    }

    /// Deregister a worker; the communication graph is repaired
    pub async fn remove_worker(&self, worker_id: &WorkerId) -> SwarmResult<Worker> {
        let worker = self.registry.write().await.deregister(worker_id)?;
        self.bus.unsubscribe_all(worker_id);
        self.refresh_metrics().await;

        info!(worker_id = %worker_id, "Worker left swarm");
        Ok(worker)
    }

    /// Every registered worker, in id order
    pub async fn workers(&self) -> Vec<Worker> {
        self.registry.read().await.snapshot()
    }

    pub async fn neighbors(&self, worker_id: &WorkerId) -> SwarmResult<BTreeSet<WorkerId>> {
        Ok(self.registry.read().await.neighbors(worker_id)?)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Run a task through decomposition, auction, execution and aggregation.
    ///
    /// Individual subtask failures are summarized in the result. Only a task
    /// without a single successful subtask is reported as an error; it is
    /// still archived and counted in the metrics.
    pub async fn submit_task(
        &self,
        description: impl Into<String>,
        requirements: Requirements,
        complexity: f64,
        deadline: Option<DateTime<Utc>>,
    ) -> SwarmResult<TaskResult> {
        let started = Instant::now();
        let mut task = Task::new(description, requirements, complexity)?.with_deadline(deadline);
        let task_id = task.id.clone();

        self.announce(SwarmMessage::broadcast(
            COORDINATOR_ID,
            message_types::TASK_SUBMITTED,
            json!({ "task_id": task_id, "complexity": complexity }),
        ));

        let subtasks = decompose(&task);
        info!(task_id = %task_id, complexity, subtasks = subtasks.len(), "Task decomposed");

        task.transition(TaskStatus::Running)?;
        let workers = self.registry.read().await.snapshot();
        let assignments = self.auctions.assign(&subtasks, &workers).await;
        task.assigned_workers = assignments.values().cloned().collect();

        let mut outcomes = self
            .execution
            .execute(&subtasks, &assignments, &self.registry, task.deadline)
            .await;
        for subtask in subtasks.iter().filter(|s| !assignments.contains_key(&s.id)) {
            warn!(task_id = %task_id, subtask_id = %subtask.id, "Subtask had no capable bidder");
            outcomes.insert(
                subtask.id.clone(),
                SubtaskOutcome::Failed {
                    subtask_id: subtask.id.clone(),
                    worker_id: None,
                    fault: SubtaskFault::BidShortfall,
                    elapsed: Duration::ZERO,
                },
            );
        }

        let result = aggregate(outcomes, &task);
        task.finish(result.clone())?;

        let efficiency = coordination_efficiency(task.complexity, result.total_elapsed);
        self.metrics.write().await.record_task(result.success, efficiency);
        self.refresh_metrics().await;
        self.detect_emergence(&result).await;

        if self.config.auto_rebalance {
            if let Err(e) = self.rebalance().await {
                warn!(error = %e, "Automatic rebalance failed");
            }
        }

        info!(
            task_id = %task_id,
            success = result.success,
            succeeded = result.successful_subtasks,
            failed = result.failed_subtasks,
            workers = result.participating_workers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Task finished"
        );
        self.announce(SwarmMessage::broadcast(
            COORDINATOR_ID,
            message_types::TASK_COMPLETED,
            json!({
                "task_id": task_id,
                "success": result.success,
                "successful_subtasks": result.successful_subtasks,
                "failed_subtasks": result.failed_subtasks,
            }),
        ));
        self.archive.write().await.put_task(task);

        if result.successful_subtasks == 0 {
            return Err(SwarmError::NoSuccessfulSubtasks {
                task_id,
                result: Box::new(result),
            });
        }
        Ok(result)
    }

    /// Most recently finished tasks, newest first
    pub async fn completed_tasks(&self, limit: usize) -> Vec<Task> {
        self.archive.read().await.recent(limit)
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.archive.read().await.get_task(task_id).cloned()
    }

    // =========================================================================
    // Metrics and adaptation
    // =========================================================================

    pub async fn metrics(&self) -> SwarmMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn emergence_patterns(&self) -> Vec<EmergencePattern> {
        self.emergence.lock().await.patterns()
    }

    /// Restructure the network when collective intelligence is low, then
    /// reassign roles and rebalance backlog
    pub async fn evolve_structure(&self) -> SwarmResult<EvolutionReport> {
        self.refresh_metrics().await;
        let collective_intelligence = self.metrics.read().await.collective_intelligence;

        let report = {
            let mut registry = self.registry.write().await;
            let restructured = collective_intelligence < self.config.restructure_threshold;
            if restructured {
                registry.restructure();
            }
            let role_changes = self.roles.reassign_roles(&mut registry);
            let transfers = self.balancer.rebalance(&mut registry)?;
            EvolutionReport {
                restructured,
                links: registry.link_count(),
                role_changes,
                transfers,
            }
        };

        for change in &report.role_changes {
            self.announce(SwarmMessage::broadcast(
                COORDINATOR_ID,
                message_types::ROLE_CHANGED,
                json!({ "worker_id": change.worker_id, "from": change.from, "role": change.to }),
            ));
        }
        self.refresh_metrics().await;

        info!(
            collective_intelligence,
            restructured = report.restructured,
            links = report.links,
            role_changes = report.role_changes.len(),
            transfers = report.transfers.len(),
            "Swarm structure evolved"
        );
        Ok(report)
    }

    /// Move backlog from overloaded to underloaded workers
    pub async fn rebalance(&self) -> SwarmResult<Vec<Transfer>> {
        let mut registry = self.registry.write().await;
        Ok(self.balancer.rebalance(&mut registry)?)
    }

    /// Recompute collective intelligence and network density from the registry
    async fn refresh_metrics(&self) {
        let (collective_intelligence, network_density) = {
            let registry = self.registry.read().await;
            let baseline = swarm_baseline(&registry.snapshot()).unwrap_or(0.0);
            (baseline, registry.density())
        };

        let mut metrics = self.metrics.write().await;
        metrics.collective_intelligence = collective_intelligence;
        metrics.network_density = network_density;
    }

    async fn detect_emergence(&self, result: &TaskResult) {
        let workers = self.registry.read().await.snapshot();
        let Some(pattern) = self.emergence.lock().await.detect(result, &workers) else {
            return;
        };

        self.metrics.write().await.emergence_events += 1;
        self.announce(SwarmMessage::broadcast(
            COORDINATOR_ID,
            message_types::EMERGENCE_DETECTED,
            json!({
                "task_id": pattern.task_id,
                "kind": pattern.kind,
                "improvement_factor": pattern.improvement_factor,
            }),
        ));
    }

    // =========================================================================
    // Consensus
    // =========================================================================

    /// Open a proposal among registered workers
    pub async fn propose_consensus(
        &self,
        proposal_id: impl Into<String>,
        payload: serde_json::Value,
        participants: impl IntoIterator<Item = WorkerId>,
    ) -> SwarmResult<Proposal> {
        let participants: Vec<WorkerId> = participants.into_iter().collect();
        {
            let registry = self.registry.read().await;
            if let Some(missing) = participants.iter().find(|id| !registry.contains(id)) {
                return Err(RegistryError::WorkerNotFound(missing.clone()).into());
            }
        }

        let proposal = self
            .consensus
            .lock()
            .await
            .propose(proposal_id, payload, participants)?
            .clone();

        self.announce(SwarmMessage::new(
            DeliveryMode::Consensus,
            COORDINATOR_ID,
            message_types::CONSENSUS_PROPOSAL,
            json!({
                "proposal_id": proposal.id,
                "payload": proposal.payload,
                "deadline": proposal.deadline,
            }),
        ));
        Ok(proposal)
    }

    pub async fn cast_vote(
        &self,
        proposal_id: &str,
        worker_id: &WorkerId,
        accept: bool,
        confidence: f64,
    ) -> SwarmResult<VoteReceipt> {
        let receipt = self
            .consensus
            .lock()
            .await
            .vote(proposal_id, worker_id, accept, confidence)?;

        if let Some(resolution) = &receipt.resolution {
            announce_resolution(&self.bus, resolution);
        }
        Ok(receipt)
    }

    pub async fn proposal(&self, proposal_id: &str) -> Option<Proposal> {
        self.consensus.lock().await.get(proposal_id).cloned()
    }

    /// Wait for a proposal to resolve, by quorum or deadline
    pub async fn wait_for_consensus(
        &self,
        proposal_id: &str,
        timeout: Duration,
    ) -> SwarmResult<ConsensusStatus> {
        let status = self.consensus.lock().await.watch(proposal_id)?;
        Ok(wait_for_resolution(proposal_id, status, timeout).await?)
    }

    /// Fail proposals whose deadline has passed. Also run periodically once
    /// the coordinator is started.
    pub async fn sweep_consensus(&self, now: DateTime<Utc>) -> Vec<Resolution> {
        let expired = self.consensus.lock().await.sweep_expired(now);
        for resolution in &expired {
            announce_resolution(&self.bus, resolution);
        }
        expired
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    pub fn open_mailbox(&self, worker_id: &WorkerId) -> Mailbox {
        self.bus.open_mailbox(worker_id)
    }

    pub fn subscribe<I, S>(&self, worker_id: &WorkerId, message_types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bus.subscribe(worker_id, message_types);
    }

    pub fn publish(&self, message: SwarmMessage) -> SwarmResult<()> {
        Ok(self.bus.publish(message)?)
    }

    fn announce(&self, message: SwarmMessage) {
        if let Err(e) = self.bus.publish(message) {
            debug!(error = %e, "Coordinator message not published");
        }
    }
}

impl Default for SwarmCoordinator {
    fn default() -> Self {
        Self::new(SwarmConfig::default())
    }
}

/// `min(complexity * 5 / max(seconds, 0.1), 1)` over the summed subtask time
fn coordination_efficiency(complexity: f64, elapsed: Duration) -> f64 {
    (complexity * 5.0 / elapsed.as_secs_f64().max(0.1)).min(1.0)
}

fn announce_resolution(bus: &MessageBus, resolution: &Resolution) {
    let message = SwarmMessage::broadcast(
        COORDINATOR_ID,
        message_types::CONSENSUS_RESOLVED,
        json!({
            "proposal_id": resolution.proposal_id,
            "status": resolution.status,
            "ratio": resolution.ratio,
            "reason": resolution.reason,
        }),
    );
    if let Err(e) = bus.publish(message) {
        debug!(error = %e, "Consensus resolution not published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::Fixed;
    use crate::state::ACCURACY_METRIC;

    fn coordinator() -> SwarmCoordinator {
        let config = SwarmConfig {
            seed: Some(7),
            ..SwarmConfig::default()
        };
        let executor = crate::execution::SimulatedExecutor::new(Arc::new(Fixed(0.0)), Arc::new(Fixed(0.8)));
        SwarmCoordinator::new(config)
            .with_executor(Arc::new(executor))
            .with_innovation(Arc::new(Fixed(0.5)))
    }

    #[test]
    fn test_coordination_efficiency() {
        assert_eq!(coordination_efficiency(0.8, Duration::from_millis(10)), 1.0);
        assert!((coordination_efficiency(0.2, Duration::from_secs(2)) - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_add_worker_assigns_role() {
        let swarm = coordinator();
        let role = swarm
            .add_worker(WorkerSnapshot::new("d1", "data").with_metric(ACCURACY_METRIC, 0.8))
            .await
            .unwrap();
        assert_eq!(role, SwarmRole::Specialist);

        let duplicate = swarm.add_worker(WorkerSnapshot::new("d1", "data")).await;
        assert!(matches!(
            duplicate,
            Err(SwarmError::Registry(RegistryError::DuplicateWorker(_)))
        ));
    }

    #[tokio::test]
    async fn test_empty_swarm_task_is_hard_failure() {
        let swarm = coordinator();
        let err = swarm
            .submit_task("lonely", Requirements::new(), 0.1, None)
            .await
            .unwrap_err();

        match err {
            SwarmError::NoSuccessfulSubtasks { result, task_id } => {
                assert_eq!(result.failed_subtasks, 1);
                assert!(swarm.get_task(&task_id).await.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(swarm.metrics().await.tasks_processed, 1);
    }

    #[tokio::test]
    async fn test_invalid_complexity_rejected() {
        let swarm = coordinator();
        assert!(matches!(
            swarm.submit_task("x", Requirements::new(), 1.5, None).await,
            Err(SwarmError::State(StateError::InvalidComplexity(_)))
        ));
    }

    #[tokio::test]
    async fn test_proposal_requires_registered_participants() {
        let swarm = coordinator();
        let result = swarm
            .propose_consensus("p", json!({}), vec![WorkerId::from("ghost")])
            .await;
        assert!(matches!(
            result,
            Err(SwarmError::Registry(RegistryError::WorkerNotFound(_)))
        ));
    }
}
