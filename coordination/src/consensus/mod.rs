//! Weighted-majority consensus among a proposal's participants
//!
//! A proposal resolves once enough participants have voted
//! (`ceil(participants * threshold)`). The consensus ratio is the accepting
//! confidence over the total confidence cast; the proposal is reached when
//! the ratio meets the threshold. Proposals that never gather enough votes
//! fail when their deadline passes.
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordination::consensus::ConsensusEngine;
//!
//! let mut engine = ConsensusEngine::from_config(&config);
//! engine.propose("merge-plan", json!({"plan": 3}), participants)?;
//! let receipt = engine.vote("merge-plan", &worker_id, true, 0.9)?;
//! if let Some(resolution) = receipt.resolution { /* ... */ }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::SwarmConfig;
use crate::state::types::WorkerId;

/// Proposal identifier
pub type ProposalId = String;

/// Error type for consensus operations
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Proposal already exists: {0}")]
    DuplicateProposal(ProposalId),

    #[error("Proposal not found: {0}")]
    ProposalNotFound(ProposalId),

    #[error("Proposal {0} has no participants")]
    NoParticipants(ProposalId),

    #[error("Worker {worker_id} is not a participant of proposal {proposal_id}")]
    NotParticipant {
        proposal_id: ProposalId,
        worker_id: WorkerId,
    },

    #[error("Proposal {proposal_id} is already resolved ({status})")]
    AlreadyResolved {
        proposal_id: ProposalId,
        status: ConsensusStatus,
    },

    #[error("Vote confidence must be within [0, 1], got {0}")]
    InvalidConfidence(f64),

    #[error("Timed out waiting for proposal {0} to resolve")]
    WaitTimeout(ProposalId),
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Lifecycle of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    Active,
    ConsensusReached,
    ConsensusFailed,
}

impl ConsensusStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ConsensusStatus::Active)
    }
}

impl std::fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusStatus::Active => write!(f, "active"),
            ConsensusStatus::ConsensusReached => write!(f, "consensus_reached"),
            ConsensusStatus::ConsensusFailed => write!(f, "consensus_failed"),
        }
    }
}

/// Why a proposal left the active state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    QuorumReached,
    DeadlineExpired,
}

/// One participant's vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub accept: bool,
    pub confidence: f64,
    pub cast_at: DateTime<Utc>,
}

/// A decision put to a set of participants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub payload: serde_json::Value,
    pub participants: BTreeSet<WorkerId>,
    pub votes: BTreeMap<WorkerId, Vote>,
    pub status: ConsensusStatus,
    /// Accepting confidence over total confidence, set on resolution
    pub ratio: Option<f64>,
    pub reason: Option<ResolutionReason>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Accepting confidence over total confidence; 0 when nothing was cast
    pub fn current_ratio(&self) -> f64 {
        let total: f64 = self.votes.values().map(|v| v.confidence).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let accepting: f64 = self
            .votes
            .values()
            .filter(|v| v.accept)
            .map(|v| v.confidence)
            .sum();
        accepting / total
    }
}

/// Terminal state of a proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub proposal_id: ProposalId,
    pub status: ConsensusStatus,
    pub ratio: f64,
    pub votes: usize,
    pub reason: ResolutionReason,
}

/// Acknowledgement of an accepted vote
#[derive(Debug, Clone, PartialEq)]
pub struct VoteReceipt {
    /// The worker had already voted and this vote replaced it
    pub revised: bool,
    pub votes_cast: usize,
    pub quorum: usize,
    /// Set when this vote resolved the proposal
    pub resolution: Option<Resolution>,
}

struct Entry {
    proposal: Proposal,
    status_tx: watch::Sender<ConsensusStatus>,
}

/// Tracks proposals and their votes
pub struct ConsensusEngine {
    proposals: HashMap<ProposalId, Entry>,
    threshold: f64,
    deadline: Duration,
}

impl ConsensusEngine {
    pub fn new(threshold: f64, deadline: Duration) -> Self {
        Self {
            proposals: HashMap::new(),
            threshold,
            deadline,
        }
    }

    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(config.consensus_threshold, config.consensus_deadline())
    }

    /// Votes needed before a proposal with `participants` members resolves
    pub fn quorum(&self, participants: usize) -> usize {
        quorum_size(participants, self.threshold)
    }

    pub fn propose(
        &mut self,
        id: impl Into<ProposalId>,
        payload: serde_json::Value,
        participants: impl IntoIterator<Item = WorkerId>,
    ) -> ConsensusResult<&Proposal> {
        let id = id.into();
        if self.proposals.contains_key(&id) {
            return Err(ConsensusError::DuplicateProposal(id));
        }
        let participants: BTreeSet<WorkerId> = participants.into_iter().collect();
        if participants.is_empty() {
            return Err(ConsensusError::NoParticipants(id));
        }

        let now = Utc::now();
        let deadline = now
            + chrono::Duration::from_std(self.deadline).unwrap_or_else(|_| chrono::Duration::days(365));
        let (status_tx, _) = watch::channel(ConsensusStatus::Active);

        info!(
            proposal_id = %id,
            participants = participants.len(),
            quorum = self.quorum(participants.len()),
            "Consensus proposal opened"
        );

        let entry = self.proposals.entry(id.clone()).or_insert(Entry {
            proposal: Proposal {
                id,
                payload,
                participants,
                votes: BTreeMap::new(),
                status: ConsensusStatus::Active,
                ratio: None,
                reason: None,
                created_at: now,
                deadline,
                resolved_at: None,
            },
            status_tx,
        });
        Ok(&entry.proposal)
    }

    /// Record a vote. A repeated vote by the same worker replaces the earlier
    /// one and is reported as revised.
    pub fn vote(
        &mut self,
        proposal_id: &str,
        worker_id: &WorkerId,
        accept: bool,
        confidence: f64,
    ) -> ConsensusResult<VoteReceipt> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ConsensusError::InvalidConfidence(confidence));
        }

        let threshold = self.threshold;
        let entry = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))?;
        let quorum = quorum_size(entry.proposal.participants.len(), threshold);

        let proposal = &mut entry.proposal;
        if proposal.status.is_terminal() {
            return Err(ConsensusError::AlreadyResolved {
                proposal_id: proposal.id.clone(),
                status: proposal.status,
            });
        }
        if !proposal.participants.contains(worker_id) {
            return Err(ConsensusError::NotParticipant {
                proposal_id: proposal.id.clone(),
                worker_id: worker_id.clone(),
            });
        }

        let revised = proposal
            .votes
            .insert(
                worker_id.clone(),
                Vote {
                    accept,
                    confidence,
                    cast_at: Utc::now(),
                },
            )
            .is_some();
        let votes_cast = proposal.votes.len();
        debug!(proposal_id, worker_id = %worker_id, accept, confidence, revised, votes_cast, "Vote recorded");

        let resolution = if votes_cast >= quorum {
            let ratio = proposal.current_ratio();
            let status = if ratio >= threshold {
                ConsensusStatus::ConsensusReached
            } else {
                ConsensusStatus::ConsensusFailed
            };
            Some(resolve(entry, status, ratio, ResolutionReason::QuorumReached))
        } else {
            None
        };

        Ok(VoteReceipt {
            revised,
            votes_cast,
            quorum,
            resolution,
        })
    }

    /// Fail every active proposal whose deadline is before `now`
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<Resolution> {
        let mut resolutions: Vec<Resolution> = self
            .proposals
            .values_mut()
            .filter(|entry| {
                entry.proposal.status == ConsensusStatus::Active && entry.proposal.deadline <= now
            })
            .map(|entry| {
                let ratio = entry.proposal.current_ratio();
                resolve(
                    entry,
                    ConsensusStatus::ConsensusFailed,
                    ratio,
                    ResolutionReason::DeadlineExpired,
                )
            })
            .collect();
        resolutions.sort_by(|a, b| a.proposal_id.cmp(&b.proposal_id));
        resolutions
    }

    pub fn get(&self, proposal_id: &str) -> Option<&Proposal> {
        self.proposals.get(proposal_id).map(|entry| &entry.proposal)
    }

    pub fn status(&self, proposal_id: &str) -> ConsensusResult<ConsensusStatus> {
        self.get(proposal_id)
            .map(|p| p.status)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))
    }

    /// Status updates for a proposal, for awaiting outside the engine's lock
    pub fn watch(&self, proposal_id: &str) -> ConsensusResult<watch::Receiver<ConsensusStatus>> {
        self.proposals
            .get(proposal_id)
            .map(|entry| entry.status_tx.subscribe())
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))
    }

    pub fn active_count(&self) -> usize {
        self.proposals
            .values()
            .filter(|entry| entry.proposal.status == ConsensusStatus::Active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::from_config(&SwarmConfig::default())
    }
}

fn quorum_size(participants: usize, threshold: f64) -> usize {
    // 0.67 * 100 lands just above 67.0
    let needed = (participants as f64 * threshold - 1e-9).ceil();
    (needed.max(1.0) as usize).min(participants.max(1))
}

fn resolve(
    entry: &mut Entry,
    status: ConsensusStatus,
    ratio: f64,
    reason: ResolutionReason,
) -> Resolution {
    let proposal = &mut entry.proposal;
    proposal.status = status;
    proposal.ratio = Some(ratio);
    proposal.reason = Some(reason);
    proposal.resolved_at = Some(Utc::now());
    entry.status_tx.send_replace(status);

    info!(
        proposal_id = %proposal.id,
        status = %status,
        ratio,
        reason = ?reason,
        "Consensus proposal resolved"
    );

    Resolution {
        proposal_id: proposal.id.clone(),
        status,
        ratio,
        votes: proposal.votes.len(),
        reason,
    }
}

/// Wait until the watched proposal leaves the active state
pub async fn wait_for_resolution(
    proposal_id: &str,
    mut status: watch::Receiver<ConsensusStatus>,
    timeout: Duration,
) -> ConsensusResult<ConsensusStatus> {
    let waited = tokio::time::timeout(timeout, status.wait_for(|s| s.is_terminal())).await;
    match waited {
        Ok(Ok(terminal)) => Ok(*terminal),
        Ok(Err(_)) => Err(ConsensusError::ProposalNotFound(proposal_id.to_string())),
        Err(_) => Err(ConsensusError::WaitTimeout(proposal_id.to_string())),
    }
}
