//! Detection of collective performance beyond individual baselines
//!
//! A task result is emergent when its mean confidence clears an absolute
//! floor and beats the swarm baseline (mean of each worker's mean metric)
//! by a configured factor.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SwarmConfig;
use crate::state::types::{TaskId, TaskResult, Worker, WorkerId};

/// Kind of emergent behaviour observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergenceKind {
    PerformanceEmergence,
}

impl std::fmt::Display for EmergenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmergenceKind::PerformanceEmergence => write!(f, "performance_emergence"),
        }
    }
}

/// A recorded emergence event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencePattern {
    pub kind: EmergenceKind,
    pub task_id: TaskId,
    /// Mean confidence over the swarm baseline
    pub improvement_factor: f64,
    pub timestamp: DateTime<Utc>,
    pub participating_workers: BTreeSet<WorkerId>,
}

/// Mean over workers of each worker's mean metric, `None` without workers
pub fn swarm_baseline(workers: &[Worker]) -> Option<f64> {
    if workers.is_empty() {
        return None;
    }
    Some(workers.iter().map(Worker::mean_metric).sum::<f64>() / workers.len() as f64)
}

/// Flags and records emergent task results
#[derive(Debug)]
pub struct EmergenceDetector {
    confidence_floor: f64,
    factor: f64,
    patterns: VecDeque<EmergencePattern>,
    capacity: usize,
}

impl EmergenceDetector {
    pub fn new(confidence_floor: f64, factor: f64, capacity: usize) -> Self {
        Self {
            confidence_floor,
            factor,
            patterns: VecDeque::new(),
            capacity,
        }
    }

    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(
            config.emergence_confidence,
            config.emergence_factor,
            config.archive_capacity,
        )
    }

    /// Check a result against the current workers; records and returns the
    /// pattern when emergence is detected.
    pub fn detect(&mut self, result: &TaskResult, workers: &[Worker]) -> Option<EmergencePattern> {
        let baseline = swarm_baseline(workers)?;
        let confidence = result.mean_confidence;
        if confidence <= self.confidence_floor || confidence <= baseline * self.factor {
            return None;
        }

        // A zero baseline is beaten by any confidence; report the raw value
        let improvement_factor = if baseline > 0.0 {
            confidence / baseline
        } else {
            confidence
        };
        let pattern = EmergencePattern {
            kind: EmergenceKind::PerformanceEmergence,
            task_id: result.task_id.clone(),
            improvement_factor,
            timestamp: Utc::now(),
            participating_workers: result.participating_workers.clone(),
        };

        info!(
            task_id = %pattern.task_id,
            improvement_factor,
            baseline,
            "Emergent behaviour detected"
        );

        if self.capacity > 0 {
            if self.patterns.len() == self.capacity {
                self.patterns.pop_front();
            }
            self.patterns.push_back(pattern.clone());
        }
        Some(pattern)
    }

    /// Recorded patterns, oldest first
    pub fn patterns(&self) -> Vec<EmergencePattern> {
        self.patterns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for EmergenceDetector {
    fn default() -> Self {
        Self::from_config(&SwarmConfig::default())
    }
}
