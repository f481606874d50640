//! Backlog redistribution
//!
//! Workers above `1.5 * average` backlog are overloaded, workers below
//! `0.5 * average` underloaded. Each overloaded worker (in id order) hands one
//! item to the currently least-loaded underloaded worker per pass.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::registry::{RegistryResult, WorkerRegistry};
use crate::state::types::{Worker, WorkerId};

const OVERLOAD_FACTOR: f64 = 1.5;
const UNDERLOAD_FACTOR: f64 = 0.5;

/// One backlog item moved between workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub from: WorkerId,
    pub to: WorkerId,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadBalancer {
    overload_factor: f64,
    underload_factor: f64,
}

impl LoadBalancer {
    pub fn new(overload_factor: f64, underload_factor: f64) -> Self {
        Self {
            overload_factor,
            underload_factor,
        }
    }

    /// Transfers one pass would perform. Pure.
    pub fn plan(&self, workers: &[Worker]) -> Vec<Transfer> {
        if workers.is_empty() {
            return Vec::new();
        }

        let mut backlogs: BTreeMap<&WorkerId, usize> =
            workers.iter().map(|w| (&w.id, w.backlog)).collect();
        let average = backlogs.values().sum::<usize>() as f64 / backlogs.len() as f64;

        let overloaded: Vec<&WorkerId> = backlogs
            .iter()
            .filter(|(_, b)| **b as f64 > average * self.overload_factor)
            .map(|(id, _)| *id)
            .collect();
        let underloaded: Vec<&WorkerId> = backlogs
            .iter()
            .filter(|(_, b)| (**b as f64) < average * self.underload_factor)
            .map(|(id, _)| *id)
            .collect();

        debug!(
            average,
            overloaded = overloaded.len(),
            underloaded = underloaded.len(),
            "Load assessed"
        );

        let mut transfers = Vec::new();
        for from in overloaded {
            // Ids iterate in order, so min_by_key keeps the lowest id on ties
            let Some(to) = underloaded.iter().copied().min_by_key(|id| backlogs[id]) else {
                break;
            };
            if let Some(b) = backlogs.get_mut(from) {
                *b -= 1;
            }
            if let Some(b) = backlogs.get_mut(to) {
                *b += 1;
            }
            transfers.push(Transfer {
                from: from.clone(),
                to: to.clone(),
            });
        }
        transfers
    }

    /// Plan against the registry's workers and apply the transfers
    pub fn rebalance(&self, registry: &mut WorkerRegistry) -> RegistryResult<Vec<Transfer>> {
        let transfers = self.plan(&registry.snapshot());
        for transfer in &transfers {
            registry.transfer_backlog(&transfer.from, &transfer.to)?;
        }
        if !transfers.is_empty() {
            info!(transfers = transfers.len(), "Backlog rebalanced");
        }
        Ok(transfers)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(OVERLOAD_FACTOR, UNDERLOAD_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::WorkerSnapshot;

    fn workers(backlogs: &[usize]) -> Vec<Worker> {
        backlogs
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                Worker::from_snapshot(WorkerSnapshot::new(format!("w{i}"), "general").with_backlog(b))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_no_transfer_below_overload_threshold() {
        // average 7.75, overload threshold 11.625
        assert!(LoadBalancer::default().plan(&workers(&[10, 10, 10, 1])).is_empty());
    }

    #[test]
    fn test_single_item_moves_to_idle_worker() {
        // average 6, thresholds 9 and 3
        let transfers = LoadBalancer::default().plan(&workers(&[20, 2, 2, 0]));
        assert_eq!(
            transfers,
            vec![Transfer {
                from: "w0".into(),
                to: "w3".into()
            }]
        );
    }

    #[test]
    fn test_target_is_least_loaded_as_transfers_happen() {
        // average 7.5, overload > 11.25, underload < 3.75
        let transfers = LoadBalancer::default().plan(&workers(&[14, 14, 1, 1]));
        let targets: Vec<_> = transfers.iter().map(|t| t.to.as_str()).collect();
        assert_eq!(targets, ["w2", "w3"]);
    }

    #[test]
    fn test_idle_swarm() {
        assert!(LoadBalancer::default().plan(&workers(&[0, 0, 0])).is_empty());
        assert!(LoadBalancer::default().plan(&[]).is_empty());
    }

    #[test]
    fn test_rebalance_applies_to_registry() {
        let mut registry = WorkerRegistry::default();
        for worker in workers(&[20, 2, 2, 0]) {
            registry.register(worker).unwrap();
        }

        let transfers = LoadBalancer::default().rebalance(&mut registry).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(registry.get(&"w0".into()).unwrap().backlog, 19);
        assert_eq!(registry.get(&"w3".into()).unwrap().backlog, 1);
    }
}
