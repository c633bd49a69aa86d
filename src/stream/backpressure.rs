//! Bounded outbound queue per subscriber (§4.F "Back-pressure"). A connection's
//! websocket writer drains this queue; when it falls behind, overflow evicts the
//! oldest non-recovery message first rather than dropping the newest push.

use std::collections::VecDeque;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub is_recovery: bool,
    pub payload: Value,
}

pub struct OutboundQueue {
    capacity: usize,
    items: VecDeque<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), items: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pushes `msg`; if the queue is at capacity, evicts the oldest non-recovery
    /// message to make room. Returns `true` if an eviction occurred.
    pub fn push(&mut self, msg: OutboundMessage) -> bool {
        if self.items.len() < self.capacity {
            self.items.push_back(msg);
            return false;
        }
        if let Some(pos) = self.items.iter().position(|m| !m.is_recovery) {
            self.items.remove(pos);
        } else {
            self.items.pop_front();
        }
        self.items.push_back(msg);
        true
    }

    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(is_recovery: bool, tag: i64) -> OutboundMessage {
        OutboundMessage { is_recovery, payload: json!({ "tag": tag }) }
    }

    #[test]
    fn evicts_oldest_non_recovery_on_overflow() {
        let mut queue = OutboundQueue::new(2);
        queue.push(msg(false, 1));
        queue.push(msg(true, 2));
        let evicted = queue.push(msg(false, 3));
        assert!(evicted);
        let remaining: Vec<i64> = queue.drain().iter().map(|m| m.payload["tag"].as_i64().unwrap()).collect();
        assert_eq!(remaining, vec![2, 3]);
    }

    #[test]
    fn falls_back_to_dropping_oldest_recovery_when_all_recovery() {
        let mut queue = OutboundQueue::new(1);
        queue.push(msg(true, 1));
        queue.push(msg(true, 2));
        let remaining: Vec<i64> = queue.drain().iter().map(|m| m.payload["tag"].as_i64().unwrap()).collect();
        assert_eq!(remaining, vec![2]);
    }
}
