//! Bounded message history for diagnostics and replay
//!
//! Keeps the most recent N published messages. Older messages are evicted
//! first; nothing is persisted.

use std::collections::{HashMap, HashSet, VecDeque};

use super::types::SwarmMessage;
use crate::state::types::WorkerId;

/// Ring buffer of recently published messages
#[derive(Debug)]
pub struct MessageHistory {
    entries: VecDeque<SwarmMessage>,
    capacity: usize,
}

impl MessageHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn record(&mut self, message: SwarmMessage) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    /// Up to `limit` messages, newest last
    pub fn recent(&self, limit: usize) -> Vec<SwarmMessage> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn by_type(&self, message_type: &str) -> Vec<SwarmMessage> {
        self.entries
            .iter()
            .filter(|m| m.message_type == message_type)
            .cloned()
            .collect()
    }

    pub fn by_sender(&self, sender: &WorkerId) -> Vec<SwarmMessage> {
        self.entries
            .iter()
            .filter(|m| &m.sender == sender)
            .cloned()
            .collect()
    }

    /// Feed every retained message, oldest first, through `callback`
    pub fn replay<F>(&self, mut callback: F) -> ReplayStats
    where
        F: FnMut(&SwarmMessage),
    {
        let mut stats = ReplayStats::new();
        for message in &self.entries {
            stats.record_message(message);
            callback(message);
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Statistics from a replay
#[derive(Debug, Default)]
pub struct ReplayStats {
    pub total_messages: usize,
    pub senders_seen: usize,
    pub messages_by_type: HashMap<String, usize>,
    senders: HashSet<WorkerId>,
}

impl ReplayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&mut self, message: &SwarmMessage) {
        self.total_messages += 1;
        if self.senders.insert(message.sender.clone()) {
            self.senders_seen += 1;
        }
        *self
            .messages_by_type
            .entry(message.message_type.clone())
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_history_keeps_most_recent() {
        let mut history = MessageHistory::new(3);
        for i in 0..5 {
            history.record(SwarmMessage::broadcast("a", format!("m{i}"), json!({})));
        }

        assert_eq!(history.len(), 3);
        let recent = history.recent(2);
        assert_eq!(recent[0].message_type, "m3");
        assert_eq!(recent[1].message_type, "m4");
    }

    #[test]
    fn test_queries_and_replay() {
        let mut history = MessageHistory::new(10);
        history.record(SwarmMessage::broadcast("a", "ping", json!({})));
        history.record(SwarmMessage::broadcast("b", "ping", json!({})));
        history.record(SwarmMessage::direct("a", "b", "pong", json!({})));

        assert_eq!(history.by_type("ping").len(), 2);
        assert_eq!(history.by_sender(&"a".into()).len(), 2);

        let mut seen = 0;
        let stats = history.replay(|_| seen += 1);
        assert_eq!(seen, 3);
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.senders_seen, 2);
        assert_eq!(stats.messages_by_type["ping"], 2);
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let mut history = MessageHistory::new(0);
        history.record(SwarmMessage::broadcast("a", "ping", json!({})));
        assert!(history.is_empty());
    }
}
