//! Inter-worker messaging
//!
//! # Architecture
//!
//! 1. **Message Types** (`types.rs`): the [`SwarmMessage`] envelope, delivery
//!    modes and well-known message type tags.
//!
//! 2. **Message Bus** (`bus.rs`): FIFO publish queue drained by a single
//!    router task into bounded per-worker mailboxes.
//!
//! 3. **Message History** (`history.rs`): bounded record of published
//!    messages for queries and replay statistics.
//!
//! # Message Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Publisher   │────▶│  FIFO queue  │────▶│    Router    │
//! │  (publish)   │     │  + history   │     │  (one hop)   │
//! └──────────────┘     └──────────────┘     └──────┬───────┘
//!                                                  │ mode + subscriptions
//!                                                  ▼
//!                                           ┌──────────────┐
//!                                           │  Mailboxes   │
//!                                           └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordination::events::{MessageBus, SwarmMessage};
//! use tokio_util::sync::CancellationToken;
//!
//! let bus = MessageBus::from_config(&config).shared();
//! let shutdown = CancellationToken::new();
//! let router = bus.spawn_router(shutdown.clone())?;
//!
//! bus.subscribe(&worker_id, ["task_completed"]);
//! let mut mailbox = bus.open_mailbox(&worker_id);
//! bus.publish(SwarmMessage::broadcast("swarm", "task_completed", json!({})))?;
//! let message = mailbox.recv().await;
//!
//! shutdown.cancel();
//! router.await?;
//! ```

pub mod bus;
pub mod history;
pub mod types;

pub use bus::{BusError, BusResult, BusStats, Mailbox, MessageBus, SharedMessageBus};
pub use history::{MessageHistory, ReplayStats};
pub use types::{
    message_types, DeliveryMode, MessageId, SwarmMessage, COORDINATOR_ID, DEFAULT_PRIORITY,
    DEFAULT_TTL,
};
