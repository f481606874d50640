//! Concurrent subtask execution
//!
//! Every awarded (worker, subtask) pair runs as its own spawned task through
//! a [`SubtaskExecutor`]. Errors, panics and timeouts are converted into
//! failure outcomes; a failing unit never cancels its siblings. Successful
//! units smooth the worker's accuracy with the reported confidence.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SwarmConfig;
use crate::heuristics::{derive_seed, sampled_duration, SeededUniform, SharedHeuristic};
use crate::registry::SharedWorkerRegistry;
use crate::state::types::{Subtask, SubtaskFault, SubtaskId, SubtaskOutcome, Worker, WorkerId};

/// Error returned by an executor for a single unit
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),
}

/// What a successful unit reports back
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub confidence: f64,
    pub output: String,
}

/// Performs the work of one subtask on behalf of a worker
#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    async fn execute(&self, worker: &Worker, subtask: &Subtask) -> Result<Execution, ExecutionError>;
}

/// Shared reference to a subtask executor
pub type SharedExecutor = Arc<dyn SubtaskExecutor>;

/// Stand-in executor: waits a sampled delay and reports a sampled confidence
pub struct SimulatedExecutor {
    /// Delay in milliseconds
    delay: SharedHeuristic,
    confidence: SharedHeuristic,
}

impl SimulatedExecutor {
    pub fn new(delay: SharedHeuristic, confidence: SharedHeuristic) -> Self {
        Self { delay, confidence }
    }

    /// 100 to 1000 ms of work, confidence between 0.7 and 0.95
    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(
            SeededUniform::new(100.0, 1000.0, derive_seed(config.seed, 2)).shared(),
            SeededUniform::new(0.7, 0.95, derive_seed(config.seed, 3)).shared(),
        )
    }
}

#[async_trait]
impl SubtaskExecutor for SimulatedExecutor {
    async fn execute(&self, worker: &Worker, subtask: &Subtask) -> Result<Execution, ExecutionError> {
        let delay = sampled_duration(self.delay.sample(worker.id.as_str()) / 1000.0);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(Execution {
            confidence: self.confidence.sample(worker.id.as_str()).clamp(0.0, 1.0),
            output: format!("{} completed by {}", subtask.description, worker.id),
        })
    }
}

/// Runs awarded subtasks and collects their outcomes
pub struct ExecutionCoordinator {
    executor: SharedExecutor,
    timeout: Duration,
}

impl ExecutionCoordinator {
    pub fn new(executor: SharedExecutor, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(
            Arc::new(SimulatedExecutor::from_config(config)),
            config.execution_timeout(),
        )
    }

    pub fn with_executor(mut self, executor: SharedExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Per-unit timeout, shortened to whatever remains before `deadline`
    pub fn unit_timeout(&self, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        match deadline {
            Some(deadline) => {
                let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
                self.timeout.min(remaining)
            }
            None => self.timeout,
        }
    }

    /// Execute every assignment concurrently and wait for all of them.
    ///
    /// Subtasks without an assignment are ignored here; the caller records
    /// them as bid shortfalls.
    pub async fn execute(
        &self,
        subtasks: &[Subtask],
        assignments: &BTreeMap<SubtaskId, WorkerId>,
        registry: &SharedWorkerRegistry,
        deadline: Option<DateTime<Utc>>,
    ) -> BTreeMap<SubtaskId, SubtaskOutcome> {
        let unit_timeout = self.unit_timeout(deadline, Utc::now());
        let mut outcomes = BTreeMap::new();
        let mut handles = Vec::new();

        for subtask in subtasks {
            let Some(worker_id) = assignments.get(&subtask.id) else {
                continue;
            };

            let worker = registry.read().await.get(worker_id).cloned();
            let Some(worker) = worker else {
                warn!(subtask_id = %subtask.id, worker_id = %worker_id, "Assigned worker left the swarm");
                outcomes.insert(
                    subtask.id.clone(),
                    SubtaskOutcome::Failed {
                        subtask_id: subtask.id.clone(),
                        worker_id: Some(worker_id.clone()),
                        fault: SubtaskFault::WorkerUnavailable,
                        elapsed: Duration::ZERO,
                    },
                );
                continue;
            };

            let key = (subtask.id.clone(), worker_id.clone());
            let unit = run_unit(
                Arc::clone(&self.executor),
                Arc::clone(registry),
                worker,
                subtask.clone(),
                unit_timeout,
            );
            handles.push((key, Instant::now(), tokio::spawn(unit)));
        }

        for ((subtask_id, worker_id), started, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        "execution unit cancelled".to_string()
                    };
                    warn!(subtask_id = %subtask_id, worker_id = %worker_id, reason = %message, "Execution unit aborted");
                    SubtaskOutcome::Failed {
                        subtask_id: subtask_id.clone(),
                        worker_id: Some(worker_id),
                        fault: SubtaskFault::Panicked { message },
                        elapsed: started.elapsed(),
                    }
                }
            };
            outcomes.insert(subtask_id, outcome);
        }

        outcomes
    }
}

async fn run_unit(
    executor: SharedExecutor,
    registry: SharedWorkerRegistry,
    worker: Worker,
    subtask: Subtask,
    unit_timeout: Duration,
) -> SubtaskOutcome {
    let started = Instant::now();
    let result = tokio::time::timeout(unit_timeout, executor.execute(&worker, &subtask)).await;
    let elapsed = started.elapsed();

    match result {
        Ok(Ok(execution)) => {
            let confidence = execution.confidence.clamp(0.0, 1.0);
            match registry.write().await.update_accuracy(&worker.id, confidence) {
                Ok(accuracy) => {
                    debug!(subtask_id = %subtask.id, worker_id = %worker.id, confidence, accuracy, "Subtask succeeded")
                }
                Err(e) => debug!(subtask_id = %subtask.id, error = %e, "Accuracy not updated"),
            }
            SubtaskOutcome::Succeeded {
                subtask_id: subtask.id,
                worker_id: worker.id,
                elapsed,
                confidence,
                output: execution.output,
            }
        }
        Ok(Err(e)) => {
            warn!(subtask_id = %subtask.id, worker_id = %worker.id, error = %e, "Subtask failed");
            SubtaskOutcome::Failed {
                subtask_id: subtask.id,
                worker_id: Some(worker.id),
                fault: SubtaskFault::Execution {
                    message: e.to_string(),
                },
                elapsed,
            }
        }
        Err(_) => {
            warn!(
                subtask_id = %subtask.id,
                worker_id = %worker.id,
                timeout_ms = unit_timeout.as_millis() as u64,
                "Subtask timed out"
            );
            SubtaskOutcome::Failed {
                subtask_id: subtask.id,
                worker_id: Some(worker.id),
                fault: SubtaskFault::TimedOut {
                    after_ms: unit_timeout.as_millis() as u64,
                },
                elapsed,
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::Fixed;
    use crate::registry::WorkerRegistry;
    use crate::state::types::{Requirements, WorkerSnapshot, ACCURACY_METRIC};

    /// Fails `*_2`, panics on `*_panic`, hangs on `*_hang`
    struct ScriptedExecutor;

    #[async_trait]
    impl SubtaskExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            worker: &Worker,
            subtask: &Subtask,
        ) -> Result<Execution, ExecutionError> {
            if subtask.id.ends_with("_2") {
                return Err(ExecutionError::Failed("disk full".into()));
            }
            if subtask.id.ends_with("_panic") {
                panic!("unit exploded");
            }
            if subtask.id.ends_with("_hang") {
                std::future::pending::<()>().await;
            }
            Ok(Execution {
                confidence: 1.0,
                output: format!("{} by {}", subtask.id, worker.id),
            })
        }
    }

    fn subtask(id: &str) -> Subtask {
        Subtask {
            id: id.into(),
            task_id: "t".into(),
            description: "work".into(),
            requirements: Requirements::new(),
        }
    }

    async fn registry(ids: &[&str]) -> SharedWorkerRegistry {
        let registry = WorkerRegistry::default().shared();
        for id in ids {
            let worker = Worker::from_snapshot(
                WorkerSnapshot::new(*id, "general").with_metric(ACCURACY_METRIC, 0.5),
            )
            .unwrap();
            registry.write().await.register(worker).unwrap();
        }
        registry
    }

    fn assign(pairs: &[(&str, &str)]) -> BTreeMap<SubtaskId, WorkerId> {
        pairs
            .iter()
            .map(|(s, w)| (s.to_string(), WorkerId::from(*w)))
            .collect()
    }

    fn coordinator(timeout: Duration) -> ExecutionCoordinator {
        ExecutionCoordinator::new(Arc::new(ScriptedExecutor), timeout)
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_siblings() {
        let registry = registry(&["a", "b", "c"]).await;
        let subtasks = vec![subtask("t_1"), subtask("t_2"), subtask("t_3")];
        let assignments = assign(&[("t_1", "a"), ("t_2", "b"), ("t_3", "c")]);

        let outcomes = coordinator(Duration::from_secs(5))
            .execute(&subtasks, &assignments, &registry, None)
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes["t_1"].is_success());
        assert!(outcomes["t_3"].is_success());
        match &outcomes["t_2"] {
            SubtaskOutcome::Failed {
                worker_id, fault, ..
            } => {
                assert_eq!(worker_id.as_ref(), Some(&WorkerId::from("b")));
                assert!(matches!(fault, SubtaskFault::Execution { message } if message == "disk full"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_smooths_accuracy() {
        let registry = registry(&["a"]).await;
        coordinator(Duration::from_secs(5))
            .execute(&[subtask("t_1")], &assign(&[("t_1", "a")]), &registry, None)
            .await;

        let accuracy = registry.read().await.get(&WorkerId::from("a")).unwrap().accuracy();
        assert!((accuracy - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let registry = registry(&["a", "b"]).await;
        let subtasks = vec![subtask("t_panic"), subtask("t_1")];
        let outcomes = coordinator(Duration::from_secs(5))
            .execute(
                &subtasks,
                &assign(&[("t_panic", "a"), ("t_1", "b")]),
                &registry,
                None,
            )
            .await;

        assert!(matches!(
            &outcomes["t_panic"],
            SubtaskOutcome::Failed { fault: SubtaskFault::Panicked { message }, .. } if message == "unit exploded"
        ));
        assert!(outcomes["t_1"].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_unit_times_out() {
        let registry = registry(&["a"]).await;
        let outcomes = coordinator(Duration::from_millis(250))
            .execute(&[subtask("t_hang")], &assign(&[("t_hang", "a")]), &registry, None)
            .await;

        assert!(matches!(
            &outcomes["t_hang"],
            SubtaskOutcome::Failed { fault: SubtaskFault::TimedOut { after_ms: 250 }, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_worker_is_unavailable() {
        let registry = registry(&[]).await;
        let outcomes = coordinator(Duration::from_secs(5))
            .execute(&[subtask("t_1")], &assign(&[("t_1", "ghost")]), &registry, None)
            .await;

        assert!(matches!(
            &outcomes["t_1"],
            SubtaskOutcome::Failed { fault: SubtaskFault::WorkerUnavailable, .. }
        ));
    }

    #[test]
    fn test_deadline_shortens_timeout() {
        let coordinator = coordinator(Duration::from_secs(30));
        let now = Utc::now();

        assert_eq!(coordinator.unit_timeout(None, now), Duration::from_secs(30));
        assert_eq!(
            coordinator.unit_timeout(Some(now + chrono::Duration::seconds(2)), now),
            Duration::from_secs(2)
        );
        assert_eq!(
            coordinator.unit_timeout(Some(now - chrono::Duration::seconds(2)), now),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_simulated_executor_reports_confidence() {
        let executor = SimulatedExecutor::new(Arc::new(Fixed(0.0)), Arc::new(Fixed(0.8)));
        let worker = Worker::from_snapshot(WorkerSnapshot::new("a", "data")).unwrap();
        let execution = executor.execute(&worker, &subtask("t_0")).await.unwrap();

        assert_eq!(execution.confidence, 0.8);
        assert_eq!(execution.output, "work completed by a");
    }
}
