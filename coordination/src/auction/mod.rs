//! Subtask auctions
//!
//! Each subtask is offered to every registered worker. A worker bids when
//! its capability for the subtask exceeds the bid threshold; the cheapest bid
//! wins and ties go to the lowest worker id. Auctions for different subtasks
//! run concurrently, and bid collection for one auction is bounded by the
//! configured bid timeout.
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordination::auction::AuctionCoordinator;
//!
//! let auctions = AuctionCoordinator::from_config(&config);
//! let assignments = auctions.assign(&subtasks, &registry.snapshot()).await;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SwarmConfig;
use crate::events::{message_types, DeliveryMode, SharedMessageBus, SwarmMessage, COORDINATOR_ID};
use crate::heuristics::{derive_seed, sampled_duration, SeededUniform, SharedHeuristic};
use crate::state::types::{Bid, Subtask, SubtaskId, Worker, WorkerId};

/// Scores how well a worker fits a subtask, in [0, 1]
pub trait CapabilityScorer: Send + Sync {
    fn score(&self, worker: &Worker, subtask: &Subtask) -> f64;
}

/// Shared reference to a capability scorer
pub type SharedCapabilityScorer = Arc<dyn CapabilityScorer>;

/// `0.5`, plus `0.3` on a specialization match (or `0.1` for generalists),
/// plus `0.2 * accuracy`, capped at 1.0
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCapabilityScorer;

impl CapabilityScorer for DefaultCapabilityScorer {
    fn score(&self, worker: &Worker, subtask: &Subtask) -> f64 {
        let mut score = 0.5;
        if subtask.specialization() == Some(worker.specialization.as_str()) {
            score += 0.3;
        } else if worker.is_general() {
            score += 0.1;
        }
        score += 0.2 * worker.accuracy();
        score.min(1.0)
    }
}

/// Bids and winner of one auction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuctionRound {
    pub subtask_id: SubtaskId,
    /// Every bid received, best first
    pub bids: Vec<Bid>,
    pub winner: Option<WorkerId>,
}

/// Runs auctions and awards subtasks
pub struct AuctionCoordinator {
    scorer: SharedCapabilityScorer,
    duration: SharedHeuristic,
    bid_threshold: f64,
    bid_timeout: Duration,
    bus: Option<SharedMessageBus>,
}

impl AuctionCoordinator {
    pub fn new(
        scorer: SharedCapabilityScorer,
        duration: SharedHeuristic,
        bid_threshold: f64,
        bid_timeout: Duration,
    ) -> Self {
        Self {
            scorer,
            duration,
            bid_threshold,
            bid_timeout,
            bus: None,
        }
    }

    /// Default scorer, duration estimates drawn uniformly from 1 to 10 seconds
    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(
            Arc::new(DefaultCapabilityScorer),
            SeededUniform::new(1.0, 10.0, derive_seed(config.seed, 1)).shared(),
            config.bid_threshold,
            config.bid_timeout(),
        )
    }

    /// Announce bid requests and awards on the given bus
    pub fn with_bus(mut self, bus: SharedMessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_scorer(mut self, scorer: SharedCapabilityScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_duration_estimate(mut self, duration: SharedHeuristic) -> Self {
        self.duration = duration;
        self
    }

    /// A worker's bid for a subtask, or `None` when it is not capable enough
    pub fn bid(&self, worker: &Worker, subtask: &Subtask) -> Option<Bid> {
        let capability = self.scorer.score(worker, subtask).clamp(0.0, 1.0);
        if capability <= self.bid_threshold {
            return None;
        }

        let backlog = worker.backlog as f64;
        let seconds = self.duration.sample(worker.id.as_str());
        Some(Bid {
            worker_id: worker.id.clone(),
            subtask_id: subtask.id.clone(),
            cost: (1.0 - capability) + 0.1 * backlog,
            confidence: (capability * (1.0 - 0.05 * backlog)).clamp(0.0, 1.0),
            estimated_duration: sampled_duration(seconds),
        })
    }

    /// Solicit bids for one subtask and pick the winner
    pub async fn run_auction(&self, subtask: &Subtask, workers: &[Worker]) -> AuctionRound {
        self.announce(SwarmMessage::new(
            DeliveryMode::Auction,
            COORDINATOR_ID,
            message_types::BID_REQUEST,
            json!({
                "subtask_id": subtask.id,
                "description": subtask.description,
                "requirements": subtask.requirements,
            }),
        ));

        let deadline = Instant::now() + self.bid_timeout;
        let mut pending: FuturesUnordered<_> = workers
            .iter()
            .map(|worker| async move { self.bid(worker, subtask) })
            .collect();

        let mut bids = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some(Some(bid))) => bids.push(bid),
                Ok(Some(None)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        subtask_id = %subtask.id,
                        outstanding = pending.len(),
                        "Bid collection timed out"
                    );
                    break;
                }
            }
        }

        bids.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });
        let winner = bids.first().map(|bid| bid.worker_id.clone());

        match &winner {
            Some(worker_id) => {
                debug!(subtask_id = %subtask.id, worker_id = %worker_id, bids = bids.len(), "Subtask awarded");
                self.announce(SwarmMessage::direct(
                    COORDINATOR_ID,
                    worker_id.clone(),
                    message_types::SUBTASK_AWARDED,
                    json!({ "subtask_id": subtask.id }),
                ));
            }
            None => info!(subtask_id = %subtask.id, "No capable bidder"),
        }

        AuctionRound {
            subtask_id: subtask.id.clone(),
            bids,
            winner,
        }
    }

    /// Run one auction per subtask, concurrently
    pub async fn run_auctions(&self, subtasks: &[Subtask], workers: &[Worker]) -> Vec<AuctionRound> {
        futures::future::join_all(subtasks.iter().map(|subtask| self.run_auction(subtask, workers)))
            .await
    }

    /// Award subtasks to their winning workers. Unawarded subtasks are absent.
    pub async fn assign(
        &self,
        subtasks: &[Subtask],
        workers: &[Worker],
    ) -> BTreeMap<SubtaskId, WorkerId> {
        self.run_auctions(subtasks, workers)
            .await
            .into_iter()
            .filter_map(|round| round.winner.map(|winner| (round.subtask_id, winner)))
            .collect()
    }

    fn announce(&self, message: SwarmMessage) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(message) {
                debug!(error = %e, "Auction message not published");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::Fixed;
    use crate::state::types::{Requirements, WorkerSnapshot, ACCURACY_METRIC, SPECIALIZATION_KEY};

    fn worker(id: &str, specialization: &str, accuracy: f64, backlog: usize) -> Worker {
        Worker::from_snapshot(
            WorkerSnapshot::new(id, specialization)
                .with_metric(ACCURACY_METRIC, accuracy)
                .with_backlog(backlog),
        )
        .unwrap()
    }

    fn subtask(id: &str, specialization: Option<&str>) -> Subtask {
        let mut requirements = Requirements::new();
        if let Some(s) = specialization {
            requirements.insert(SPECIALIZATION_KEY.into(), s.into());
        }
        Subtask {
            id: id.into(),
            task_id: "t".into(),
            description: "work".into(),
            requirements,
        }
    }

    fn coordinator() -> AuctionCoordinator {
        AuctionCoordinator::new(
            Arc::new(DefaultCapabilityScorer),
            Arc::new(Fixed(3.0)),
            0.5,
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_capability_score() {
        let scorer = DefaultCapabilityScorer;
        let data = subtask("s", Some("data"));

        assert!((scorer.score(&worker("a", "data", 0.8, 0), &data) - 0.96).abs() < 1e-9);
        assert!((scorer.score(&worker("b", "general", 0.8, 0), &data) - 0.76).abs() < 1e-9);
        assert!((scorer.score(&worker("c", "analysis", 0.8, 0), &data) - 0.66).abs() < 1e-9);
        assert!(scorer.score(&worker("d", "data", 1.0, 0), &data) <= 1.0);
    }

    #[test]
    fn test_bid_cost_and_confidence() {
        let bid = coordinator()
            .bid(&worker("a", "data", 0.8, 2), &subtask("s", Some("data")))
            .unwrap();
        assert!((bid.cost - 0.24).abs() < 1e-9);
        assert!((bid.confidence - 0.96 * 0.9).abs() < 1e-9);
        assert_eq!(bid.estimated_duration, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_unbounded_duration_estimate_still_bids() {
        let auctions = coordinator().with_duration_estimate(Arc::new(Fixed(f64::INFINITY)));
        let workers = vec![worker("a", "data", 0.8, 0)];

        let round = auctions.run_auction(&subtask("s", Some("data")), &workers).await;

        assert_eq!(round.winner, Some(WorkerId::from("a")));
        assert_eq!(round.bids[0].estimated_duration, Duration::ZERO);
    }

    #[test]
    fn test_below_threshold_does_not_bid() {
        struct Weak;
        impl CapabilityScorer for Weak {
            fn score(&self, _: &Worker, _: &Subtask) -> f64 {
                0.5
            }
        }
        let auctions = coordinator().with_scorer(Arc::new(Weak));
        assert!(auctions.bid(&worker("a", "data", 0.8, 0), &subtask("s", None)).is_none());
    }

    #[tokio::test]
    async fn test_specialist_wins_matching_subtask() {
        let workers = vec![
            worker("analysis-1", "analysis", 0.8, 0),
            worker("data-1", "data", 0.8, 0),
            worker("general-1", "general", 0.8, 0),
        ];
        let round = coordinator()
            .run_auction(&subtask("t_data", Some("data")), &workers)
            .await;

        assert_eq!(round.bids.len(), 3);
        assert_eq!(round.winner, Some(WorkerId::from("data-1")));
        assert_eq!(round.bids[1].worker_id, WorkerId::from("general-1"));
    }

    #[tokio::test]
    async fn test_tie_goes_to_lowest_id() {
        let workers = vec![worker("b", "data", 0.8, 0), worker("a", "data", 0.8, 0)];
        let round = coordinator()
            .run_auction(&subtask("s", Some("data")), &workers)
            .await;
        assert_eq!(round.winner, Some(WorkerId::from("a")));
    }

    #[tokio::test]
    async fn test_backlog_shifts_award() {
        let workers = vec![worker("a", "data", 0.8, 3), worker("b", "general", 0.8, 0)];
        let round = coordinator()
            .run_auction(&subtask("s", Some("data")), &workers)
            .await;
        // 0.04 + 0.3 for the busy specialist vs 0.24 for the idle generalist
        assert_eq!(round.winner, Some(WorkerId::from("b")));
    }

    #[tokio::test]
    async fn test_assign_is_deterministic() {
        let workers = vec![
            worker("w1", "data", 0.7, 1),
            worker("w2", "analysis", 0.9, 0),
            worker("w3", "general", 0.6, 2),
        ];
        let subtasks = vec![
            subtask("s_data", Some("data")),
            subtask("s_analysis", Some("analysis")),
            subtask("s_plain", None),
        ];
        let auctions = coordinator();

        let first = auctions.assign(&subtasks, &workers).await;
        let second = auctions.assign(&subtasks, &workers).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn test_no_workers_leaves_subtask_unassigned() {
        let assignments = coordinator().assign(&[subtask("s", None)], &[]).await;
        assert!(assignments.is_empty());
    }

    #[tokio::test]
    async fn test_bid_request_published() {
        let bus = crate::events::MessageBus::default().shared();
        let auctions = coordinator().with_bus(bus.clone());
        auctions
            .run_auction(&subtask("s", None), &[worker("a", "general", 0.5, 0)])
            .await;

        assert_eq!(bus.messages_of_type(message_types::BID_REQUEST).len(), 1);
        assert_eq!(bus.messages_of_type(message_types::SUBTASK_AWARDED).len(), 1);
    }
}
