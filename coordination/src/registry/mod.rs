//! Worker registry: worker records and the communication graph
//!
//! Holds every registered [`Worker`] and an undirected, weighted adjacency map
//! between them. The graph is kept connected whenever two or more workers are
//! registered: registration links a new worker to similar peers and falls
//! back to the best-connected hub, deregistration re-links stray components.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::SwarmConfig;
use crate::state::types::{SwarmRole, Worker, WorkerId};

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Worker already registered: {0}")]
    DuplicateWorker(WorkerId),

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Swarm is full ({max} workers)")]
    CapacityExceeded { max: usize },

    #[error("Worker {0} has no backlog to transfer")]
    EmptyBacklog(WorkerId),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Shared reference to WorkerRegistry (concurrent readers, one writer)
pub type SharedWorkerRegistry = Arc<RwLock<WorkerRegistry>>;

/// What registering a worker changed in the graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registration {
    /// Peers linked by similarity
    pub similar_peers: Vec<WorkerId>,
    /// Links added to restore connectivity
    pub repair_links: usize,
}

/// Similarity between two workers.
///
/// `0.6 * specialization_match + 0.4 * (1 - mean |metric difference|)`, where a
/// specialization match scores 1.0 and a mismatch 0.3. Without shared metrics
/// the metric term contributes nothing.
pub fn similarity(a: &Worker, b: &Worker) -> f64 {
    let specialization_match = if a.specialization == b.specialization {
        1.0
    } else {
        0.3
    };

    let diffs: Vec<f64> = a
        .metrics
        .iter()
        .filter_map(|(name, value)| b.metrics.get(name).map(|other| (value - other).abs()))
        .collect();

    let metric_similarity = if diffs.is_empty() {
        0.0
    } else {
        1.0 - diffs.iter().sum::<f64>() / diffs.len() as f64
    };

    0.6 * specialization_match + 0.4 * metric_similarity
}

/// Registry of workers and their communication links
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, Worker>,
    links: BTreeMap<WorkerId, BTreeMap<WorkerId, f64>>,
    max_workers: usize,
    similarity_threshold: f64,
    repair_link_weight: f64,
}

impl WorkerRegistry {
    pub fn new(max_workers: usize, similarity_threshold: f64, repair_link_weight: f64) -> Self {
        Self {
            workers: BTreeMap::new(),
            links: BTreeMap::new(),
            max_workers,
            similarity_threshold,
            repair_link_weight,
        }
    }

    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(
            config.max_workers,
            config.similarity_threshold,
            config.repair_link_weight,
        )
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedWorkerRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Insert a worker, link it to similar peers and restore connectivity
    pub fn register(&mut self, worker: Worker) -> RegistryResult<Registration> {
        if self.workers.contains_key(&worker.id) {
            return Err(RegistryError::DuplicateWorker(worker.id));
        }
        if self.workers.len() >= self.max_workers {
            return Err(RegistryError::CapacityExceeded {
                max: self.max_workers,
            });
        }

        let new_id = worker.id.clone();
        let similar: Vec<(WorkerId, f64)> = self
            .workers
            .values()
            .map(|existing| (existing.id.clone(), similarity(&worker, existing)))
            .filter(|(_, score)| *score > self.similarity_threshold)
            .collect();

        self.workers.insert(new_id.clone(), worker);
        self.links.entry(new_id.clone()).or_default();

        for (peer, score) in &similar {
            self.add_link(&new_id, peer, *score);
        }

        let repair_links = self.repair_connectivity(Some(&new_id));

        debug!(
            worker_id = %new_id,
            similar = similar.len(),
            repair_links,
            "Worker registered"
        );

        Ok(Registration {
            similar_peers: similar.into_iter().map(|(id, _)| id).collect(),
            repair_links,
        })
    }

    /// Remove a worker and re-link whatever its departure disconnected
    pub fn deregister(&mut self, id: &WorkerId) -> RegistryResult<Worker> {
        let worker = self
            .workers
            .remove(id)
            .ok_or_else(|| RegistryError::WorkerNotFound(id.clone()))?;

        if let Some(peers) = self.links.remove(id) {
            for peer in peers.keys() {
                if let Some(adjacent) = self.links.get_mut(peer) {
                    adjacent.remove(id);
                }
            }
        }

        let repaired = self.repair_connectivity(None);
        debug!(worker_id = %id, repaired, "Worker deregistered");
        Ok(worker)
    }

    pub fn neighbors(&self, id: &WorkerId) -> RegistryResult<BTreeSet<WorkerId>> {
        self.links
            .get(id)
            .map(|peers| peers.keys().cloned().collect())
            .ok_or_else(|| RegistryError::WorkerNotFound(id.clone()))
    }

    pub fn link_weight(&self, a: &WorkerId, b: &WorkerId) -> Option<f64> {
        self.links.get(a).and_then(|peers| peers.get(b)).copied()
    }

    pub fn degree(&self, id: &WorkerId) -> usize {
        self.links.get(id).map_or(0, BTreeMap::len)
    }

    /// Number of undirected links
    pub fn link_count(&self) -> usize {
        self.links.values().map(BTreeMap::len).sum::<usize>() / 2
    }

    /// Fraction of possible links present (0 with fewer than two workers)
    pub fn density(&self) -> f64 {
        let n = self.workers.len();
        if n < 2 {
            return 0.0;
        }
        2.0 * self.link_count() as f64 / (n * (n - 1)) as f64
    }

    pub fn is_connected(&self) -> bool {
        self.components().len() <= 1
    }

    pub fn get(&self, id: &WorkerId) -> Option<&Worker> {
        self.workers.get(id)
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.workers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Workers in id order
    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    /// Owned copy of every worker, in id order
    pub fn snapshot(&self) -> Vec<Worker> {
        self.workers.values().cloned().collect()
    }

    pub fn set_role(&mut self, id: &WorkerId, role: SwarmRole) -> RegistryResult<SwarmRole> {
        let worker = self.worker_mut(id)?;
        Ok(std::mem::replace(&mut worker.role, role))
    }

    pub fn set_backlog(&mut self, id: &WorkerId, backlog: usize) -> RegistryResult<()> {
        self.worker_mut(id)?.backlog = backlog;
        Ok(())
    }

    /// Move one backlog item from `from` to `to`
    pub fn transfer_backlog(&mut self, from: &WorkerId, to: &WorkerId) -> RegistryResult<()> {
        if !self.workers.contains_key(to) {
            return Err(RegistryError::WorkerNotFound(to.clone()));
        }
        let source = self.worker_mut(from)?;
        if source.backlog == 0 {
            return Err(RegistryError::EmptyBacklog(from.clone()));
        }
        source.backlog -= 1;
        self.worker_mut(to)?.backlog += 1;
        Ok(())
    }

    /// Smooth a worker's accuracy with a new confidence observation
    pub fn update_accuracy(&mut self, id: &WorkerId, confidence: f64) -> RegistryResult<f64> {
        let worker = self.worker_mut(id)?;
        worker.smooth_accuracy(confidence);
        Ok(worker.accuracy())
    }

    /// Rebuild every link from current metrics, then restore connectivity.
    ///
    /// Returns the number of links afterwards.
    pub fn restructure(&mut self) -> usize {
        for peers in self.links.values_mut() {
            peers.clear();
        }

        let ids: Vec<WorkerId> = self.workers.keys().cloned().collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                let score = similarity(&self.workers[a], &self.workers[b]);
                if score > self.similarity_threshold {
                    self.add_link(a, b, score);
                }
            }
        }

        let repaired = self.repair_connectivity(None);
        let links = self.link_count();
        info!(links, repaired, "Communication network restructured");
        links
    }

    fn worker_mut(&mut self, id: &WorkerId) -> RegistryResult<&mut Worker> {
        self.workers
            .get_mut(id)
            .ok_or_else(|| RegistryError::WorkerNotFound(id.clone()))
    }

    fn add_link(&mut self, a: &WorkerId, b: &WorkerId, weight: f64) {
        if a == b {
            return;
        }
        self.links
            .entry(a.clone())
            .or_default()
            .insert(b.clone(), weight);
        self.links
            .entry(b.clone())
            .or_default()
            .insert(a.clone(), weight);
    }

    /// Connected components, discovered in id order
    fn components(&self) -> Vec<Vec<WorkerId>> {
        let mut seen: BTreeSet<&WorkerId> = BTreeSet::new();
        let mut components = Vec::new();

        for start in self.workers.keys() {
            if !seen.insert(start) {
                continue;
            }
            let mut component = vec![start.clone()];
            let mut queue = VecDeque::from([start]);
            while let Some(current) = queue.pop_front() {
                if let Some(peers) = self.links.get(current) {
                    for peer in peers.keys() {
                        if seen.insert(peer) {
                            component.push(peer.clone());
                            queue.push_back(peer);
                        }
                    }
                }
            }
            components.push(component);
        }

        components
    }

    /// Highest-degree member, lowest id on ties
    fn hub_of<'a>(&self, members: &'a [WorkerId]) -> Option<&'a WorkerId> {
        members
            .iter()
            .max_by(|a, b| self.degree(a).cmp(&self.degree(b)).then_with(|| b.cmp(a)))
    }

    /// Link every stray component to the hub of the largest one.
    ///
    /// `preferred` is used as the endpoint inside its own component (the
    /// freshly registered worker). Returns the number of links added.
    fn repair_connectivity(&mut self, preferred: Option<&WorkerId>) -> usize {
        let components = self.components();
        if components.len() <= 1 {
            return 0;
        }

        // First-discovered wins ties, so the choice is deterministic.
        let main_index = components
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.len().cmp(&b.len()).then_with(|| ib.cmp(ia)))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let hub = match self.hub_of(&components[main_index]) {
            Some(hub) => hub.clone(),
            None => return 0,
        };

        let mut added = 0;
        for (i, component) in components.iter().enumerate() {
            if i == main_index {
                continue;
            }
            let endpoint = match preferred.filter(|p| component.contains(*p)) {
                Some(p) => p.clone(),
                None => match self.hub_of(component) {
                    Some(h) => h.clone(),
                    None => continue,
                },
            };
            self.add_link(&endpoint, &hub, self.repair_link_weight);
            info!(from = %endpoint, to = %hub, "Connectivity repaired");
            added += 1;
        }
        added
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::from_config(&SwarmConfig::default())
    }
}
