//! Message bus for inter-worker signaling
//!
//! Publishers push onto a FIFO queue; a single router task drains it and
//! delivers each message to per-worker mailboxes according to its delivery
//! mode. Delivery is fire-and-forget: a missing or full mailbox counts the
//! message as dropped for that recipient.
//!
//! The routing queue is bounded. Until a router runs, publishes accumulate
//! up to the queue capacity; anything past that is counted as dropped.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::history::MessageHistory;
use super::types::{DeliveryMode, SwarmMessage};
use crate::config::SwarmConfig;
use crate::state::types::WorkerId;

/// Error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus is shut down and no longer accepts messages")]
    Closed,

    #[error("Router is already running")]
    RouterAlreadyRunning,
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Routing queue depth used by [`MessageBus::new`]
pub const DEFAULT_QUEUE_CAPACITY: usize = 4_096;

/// Shared reference to MessageBus
pub type SharedMessageBus = Arc<MessageBus>;

/// Mailbox a worker reads its deliveries from
pub type Mailbox = mpsc::Receiver<SwarmMessage>;

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    /// Per-recipient deliveries lost to missing or full mailboxes, plus
    /// publishes rejected by a full routing queue
    pub dropped: u64,
    /// Messages discarded because their ttl was exhausted
    pub expired: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    expired: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publish/subscribe bus with a FIFO routing queue
pub struct MessageBus {
    sender: mpsc::Sender<SwarmMessage>,
    receiver: Mutex<Option<mpsc::Receiver<SwarmMessage>>>,
    subscribers: Mutex<HashMap<String, BTreeSet<WorkerId>>>,
    mailboxes: Mutex<HashMap<WorkerId, mpsc::Sender<SwarmMessage>>>,
    history: Mutex<MessageHistory>,
    mailbox_capacity: usize,
    idle_poll: Duration,
    accepting: AtomicBool,
    counters: Counters,
}

impl MessageBus {
    pub fn new(history_capacity: usize, mailbox_capacity: usize, idle_poll: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            subscribers: Mutex::new(HashMap::new()),
            mailboxes: Mutex::new(HashMap::new()),
            history: Mutex::new(MessageHistory::new(history_capacity)),
            mailbox_capacity: mailbox_capacity.max(1),
            idle_poll,
            accepting: AtomicBool::new(true),
            counters: Counters::default(),
        }
    }

    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(
            config.history_capacity,
            config.mailbox_capacity,
            config.bus_idle_poll(),
        )
        .with_queue_capacity(config.queue_capacity)
    }

    /// Replace the routing queue with one of the given depth
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.sender = sender;
        self.receiver = Mutex::new(Some(receiver));
        self
    }

    /// Create a shared reference to this bus
    pub fn shared(self) -> SharedMessageBus {
        Arc::new(self)
    }

    /// Queue a message for routing.
    ///
    /// A full queue drops the message (counted in [`BusStats::dropped`]);
    /// only a closed bus is an error.
    pub fn publish(&self, message: SwarmMessage) -> BusResult<()> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let message_type = message.message_type.clone();
        lock(&self.history).record(message.clone());
        match self.sender.try_send(message) {
            Ok(()) => {
                debug!(message_type, "Message published");
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(message_type, "Routing queue full, message dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(BusError::Closed),
        }
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Messages waiting in the routing queue
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Subscribe a worker to the given message types
    pub fn subscribe<I, S>(&self, worker_id: &WorkerId, message_types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut subscribers = lock(&self.subscribers);
        for message_type in message_types {
            subscribers
                .entry(message_type.into())
                .or_default()
                .insert(worker_id.clone());
        }
    }

    /// Drop every subscription and the mailbox of a worker
    pub fn unsubscribe_all(&self, worker_id: &WorkerId) {
        for members in lock(&self.subscribers).values_mut() {
            members.remove(worker_id);
        }
        lock(&self.mailboxes).remove(worker_id);
    }

    /// Open (or replace) the mailbox a worker receives deliveries on
    pub fn open_mailbox(&self, worker_id: &WorkerId) -> Mailbox {
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        lock(&self.mailboxes).insert(worker_id.clone(), tx);
        rx
    }

    pub fn subscribers_of(&self, message_type: &str) -> BTreeSet<WorkerId> {
        lock(&self.subscribers)
            .get(message_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
        }
    }

    pub fn recent_messages(&self, limit: usize) -> Vec<SwarmMessage> {
        lock(&self.history).recent(limit)
    }

    pub fn messages_of_type(&self, message_type: &str) -> Vec<SwarmMessage> {
        lock(&self.history).by_type(message_type)
    }

    /// Run `f` against the retained history
    pub fn with_history<R>(&self, f: impl FnOnce(&MessageHistory) -> R) -> R {
        f(&lock(&self.history))
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Recipients of a message according to its delivery mode
    pub fn recipients(&self, message: &SwarmMessage) -> Vec<WorkerId> {
        match message.mode {
            DeliveryMode::Direct => message.receiver.iter().cloned().collect(),
            DeliveryMode::Broadcast => self.subscribers_of(&message.message_type).into_iter().collect(),
            DeliveryMode::Multicast
            | DeliveryMode::Consensus
            | DeliveryMode::Auction
            | DeliveryMode::Negotiation => {
                let subscribers = self.subscribers_of(&message.message_type);
                match &message.receiver {
                    Some(receiver) => subscribers
                        .into_iter()
                        .filter(|id| id == receiver)
                        .collect(),
                    None => subscribers.into_iter().collect(),
                }
            }
        }
    }

    /// Route one message (one hop). Returns the number of mailboxes reached.
    pub fn route(&self, mut message: SwarmMessage) -> usize {
        if message.is_expired() {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            debug!(message_id = %message.id, "Message expired");
            return 0;
        }
        message.ttl -= 1;

        let recipients = self.recipients(&message);
        let mailboxes = lock(&self.mailboxes);
        let mut delivered = 0;
        for recipient in &recipients {
            let sent = mailboxes
                .get(recipient)
                .map(|tx| tx.try_send(message.clone()).is_ok())
                .unwrap_or(false);
            if sent {
                delivered += 1;
            } else {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(recipient = %recipient, message_type = %message.message_type, "Delivery dropped");
            }
        }
        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Stop accepting new messages without waiting for the router
    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Spawn the routing loop.
    ///
    /// The loop idles with a bounded wait so cancellation is observed
    /// promptly. On cancellation it stops accepting publishes, drains what is
    /// already queued and exits.
    pub fn spawn_router(self: &Arc<Self>, shutdown: CancellationToken) -> BusResult<JoinHandle<()>> {
        let mut receiver = lock(&self.receiver)
            .take()
            .ok_or(BusError::RouterAlreadyRunning)?;
        let bus = Arc::clone(self);

        Ok(tokio::spawn(async move {
            info!("Message router started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = tokio::time::timeout(bus.idle_poll, receiver.recv()) => match next {
                        Ok(Some(message)) => {
                            bus.route(message);
                        }
                        Ok(None) => break,
                        Err(_) => continue,
                    },
                }
            }

            bus.close();
            receiver.close();
            let mut drained = 0usize;
            while let Some(message) = receiver.recv().await {
                bus.route(message);
                drained += 1;
            }
            if drained > 0 {
                warn!(drained, "Routed queued messages during shutdown");
            }
            info!("Message router stopped");
        }))
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::from_config(&SwarmConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bus() -> SharedMessageBus {
        MessageBus::new(100, 8, Duration::from_millis(10)).shared()
    }

    #[test]
    fn test_broadcast_reaches_type_subscribers_only() {
        let bus = bus();
        let a = WorkerId::from("a");
        let b = WorkerId::from("b");
        bus.subscribe(&a, ["ping"]);
        bus.subscribe(&b, ["pong"]);
        let mut rx_a = bus.open_mailbox(&a);
        let mut rx_b = bus.open_mailbox(&b);

        let delivered = bus.route(SwarmMessage::broadcast("x", "ping", json!({})));

        assert_eq!(delivered, 1);
        assert_eq!(rx_a.try_recv().unwrap().message_type, "ping");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_direct_ignores_subscriptions() {
        let bus = bus();
        let b = WorkerId::from("b");
        let mut rx_b = bus.open_mailbox(&b);

        let delivered = bus.route(SwarmMessage::direct("a", "b", "anything", json!({})));

        assert_eq!(delivered, 1);
        let message = rx_b.try_recv().unwrap();
        assert_eq!(message.ttl, crate::events::DEFAULT_TTL - 1);
    }

    #[test]
    fn test_expired_message_dropped() {
        let bus = bus();
        let b = WorkerId::from("b");
        let mut rx_b = bus.open_mailbox(&b);

        let delivered = bus.route(SwarmMessage::direct("a", "b", "ping", json!({})).with_ttl(0));

        assert_eq!(delivered, 0);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(bus.stats().expired, 1);
    }

    #[test]
    fn test_full_mailbox_counts_drop() {
        let bus = MessageBus::new(10, 1, Duration::from_millis(10)).shared();
        let a = WorkerId::from("a");
        let _rx = bus.open_mailbox(&a);

        bus.route(SwarmMessage::direct("x", "a", "m", json!({})));
        bus.route(SwarmMessage::direct("x", "a", "m", json!({})));

        let stats = bus.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_auction_mode_narrowed_by_receiver() {
        let bus = bus();
        let a = WorkerId::from("a");
        let b = WorkerId::from("b");
        bus.subscribe(&a, ["bid_request"]);
        bus.subscribe(&b, ["bid_request"]);

        let message =
            SwarmMessage::new(DeliveryMode::Auction, "x", "bid_request", json!({})).to("b");
        assert_eq!(bus.recipients(&message), vec![b]);
    }

    #[tokio::test]
    async fn test_router_delivers_in_publish_order() {
        let bus = bus();
        let a = WorkerId::from("a");
        bus.subscribe(&a, ["seq"]);
        let mut rx = bus.open_mailbox(&a);

        let shutdown = CancellationToken::new();
        let handle = bus.spawn_router(shutdown.clone()).unwrap();

        for i in 0..5 {
            bus.publish(SwarmMessage::broadcast("x", "seq", json!({ "i": i })))
                .unwrap();
        }
        for i in 0..5 {
            let message = rx.recv().await.unwrap();
            assert_eq!(message.content["i"], i);
        }

        shutdown.cancel();
        handle.await.unwrap();
        assert!(matches!(
            bus.publish(SwarmMessage::broadcast("x", "seq", json!({}))),
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_router_cannot_start_twice() {
        let bus = bus();
        let shutdown = CancellationToken::new();
        let handle = bus.spawn_router(shutdown.clone()).unwrap();
        assert!(matches!(
            bus.spawn_router(shutdown.clone()),
            Err(BusError::RouterAlreadyRunning)
        ));
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = MessageBus::new(2, 8, Duration::from_millis(10));
        for i in 0..4 {
            bus.publish(SwarmMessage::broadcast("x", format!("t{i}"), json!({})))
                .unwrap();
        }
        let recent = bus.recent_messages(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].message_type, "t3");
        assert_eq!(bus.stats().published, 4);
    }

    #[test]
    fn test_queue_bounded_without_router() {
        let bus = MessageBus::new(10, 8, Duration::from_millis(10)).with_queue_capacity(16);
        for i in 0..5_000 {
            bus.publish(SwarmMessage::broadcast("x", "load", json!({ "i": i })))
                .unwrap();
        }

        assert_eq!(bus.queued(), 16);
        let stats = bus.stats();
        assert_eq!(stats.published, 5_000);
        assert_eq!(stats.dropped, 5_000 - 16);
        assert_eq!(bus.recent_messages(100).len(), 10);
    }

    #[tokio::test]
    async fn test_router_frees_queue_space() {
        let bus = MessageBus::new(10, 8, Duration::from_millis(10))
            .with_queue_capacity(4)
            .shared();
        for _ in 0..4 {
            bus.publish(SwarmMessage::broadcast("x", "load", json!({})))
                .unwrap();
        }
        assert_eq!(bus.queued(), 4);

        let shutdown = CancellationToken::new();
        let handle = bus.spawn_router(shutdown.clone()).unwrap();
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(bus.queued(), 0);
        assert_eq!(bus.stats().dropped, 0);
    }
}
