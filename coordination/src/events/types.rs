//! Message types for inter-worker signaling
//!
//! Every message carries a delivery mode and a free-form type tag. Workers
//! subscribe by type tag; the bus routes by mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::types::WorkerId;

/// Unique identifier for messages
pub type MessageId = String;

/// Hop budget given to new messages
pub const DEFAULT_TTL: u32 = 10;

/// Priority given to new messages
pub const DEFAULT_PRIORITY: u8 = 1;

/// Sender id used by the coordinator itself
pub const COORDINATOR_ID: &str = "swarm";

/// Type tags published by the coordinator
pub mod message_types {
    pub const TASK_SUBMITTED: &str = "task_submitted";
    pub const BID_REQUEST: &str = "bid_request";
    pub const SUBTASK_AWARDED: &str = "subtask_awarded";
    pub const TASK_COMPLETED: &str = "task_completed";
    pub const CONSENSUS_PROPOSAL: &str = "consensus_proposal";
    pub const CONSENSUS_RESOLVED: &str = "consensus_resolved";
    pub const EMERGENCE_DETECTED: &str = "emergence_detected";
    pub const ROLE_CHANGED: &str = "role_changed";

    /// Tags every worker is subscribed to on registration
    pub fn defaults() -> &'static [&'static str] {
        &[
            TASK_SUBMITTED,
            BID_REQUEST,
            SUBTASK_AWARDED,
            TASK_COMPLETED,
            CONSENSUS_PROPOSAL,
            CONSENSUS_RESOLVED,
            EMERGENCE_DETECTED,
            ROLE_CHANGED,
        ]
    }
}

/// How a message reaches its recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Every subscriber of the message type
    Broadcast,
    /// The named receiver only
    Direct,
    Multicast,
    Consensus,
    Auction,
    Negotiation,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Broadcast => write!(f, "broadcast"),
            DeliveryMode::Direct => write!(f, "direct"),
            DeliveryMode::Multicast => write!(f, "multicast"),
            DeliveryMode::Consensus => write!(f, "consensus"),
            DeliveryMode::Auction => write!(f, "auction"),
            DeliveryMode::Negotiation => write!(f, "negotiation"),
        }
    }
}

/// A message on the swarm bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmMessage {
    pub id: MessageId,
    pub sender: WorkerId,
    pub receiver: Option<WorkerId>,
    pub message_type: String,
    pub content: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub priority: u8,
    /// Remaining hops; the message is dropped when it reaches zero
    pub ttl: u32,
    pub mode: DeliveryMode,
}

impl SwarmMessage {
    pub fn new(
        mode: DeliveryMode,
        sender: impl Into<WorkerId>,
        message_type: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            receiver: None,
            message_type: message_type.into(),
            content,
            timestamp: Utc::now(),
            priority: DEFAULT_PRIORITY,
            ttl: DEFAULT_TTL,
            mode,
        }
    }

    pub fn broadcast(
        sender: impl Into<WorkerId>,
        message_type: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self::new(DeliveryMode::Broadcast, sender, message_type, content)
    }

    pub fn direct(
        sender: impl Into<WorkerId>,
        receiver: impl Into<WorkerId>,
        message_type: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self::new(DeliveryMode::Direct, sender, message_type, content).to(receiver)
    }

    /// Name (or narrow to) a single receiver
    pub fn to(mut self, receiver: impl Into<WorkerId>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_expired(&self) -> bool {
        self.ttl == 0
    }
}
