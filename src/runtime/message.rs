// runtime/message.rs - Messages, Buffers, and the Logical Clock

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A message in flight between two roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id
    pub id: Uuid,

    pub sender: String,
    pub receiver: String,
    pub label: String,

    /// Payload type carried by the message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    /// Monotone logical timestamp; the FIFO property is checked against it
    pub timestamp: u64,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        label: impl Into<String>,
        payload: Option<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            receiver: receiver.into(),
            label: label.into(),
            payload,
            timestamp,
        }
    }
}

/// Shared monotone clock stamping messages.
///
/// One clock per simulation run; the distributed coordinator hands the same
/// clock to every role simulator so timestamps are totally ordered across
/// senders.
#[derive(Debug, Clone, Default)]
pub struct MessageClock(Arc<AtomicU64>);

impl MessageClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Buffer delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("buffer from {sender} full ({capacity} messages): cannot deliver {label}")]
pub struct BufferOverflow {
    pub sender: String,
    pub label: String,
    pub capacity: usize,
}

/// Per-sender FIFO queues of one role's incoming messages.
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    queues: BTreeMap<String, VecDeque<Message>>,

    /// 0 = unbounded
    max_size: usize,
}

impl MessageBuffer {
    pub fn bounded(max_size: usize) -> Self {
        Self {
            queues: BTreeMap::new(),
            max_size,
        }
    }

    /// Append a message to its sender's queue.
    pub fn deliver(&mut self, message: Message) -> Result<usize, BufferOverflow> {
        let queue = self.queues.entry(message.sender.clone()).or_default();
        if self.max_size > 0 && queue.len() >= self.max_size {
            return Err(BufferOverflow {
                sender: message.sender,
                label: message.label,
                capacity: self.max_size,
            });
        }
        queue.push_back(message);
        Ok(queue.len())
    }

    pub fn head(&self, sender: &str) -> Option<&Message> {
        self.queues.get(sender).and_then(VecDeque::front)
    }

    pub fn pop(&mut self, sender: &str) -> Option<Message> {
        self.queues.get_mut(sender).and_then(VecDeque::pop_front)
    }

    pub fn depth(&self, sender: &str) -> usize {
        self.queues.get(sender).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Whether the head of `sender`'s queue is the oldest message in that
    /// queue. A well-behaved coordinator can never make this false; a false
    /// here is reported verbatim as a FIFO violation.
    pub fn head_is_oldest(&self, sender: &str) -> bool {
        let Some(queue) = self.queues.get(sender) else {
            return true;
        };
        let Some(head) = queue.front() else {
            return true;
        };
        queue.iter().all(|m| head.timestamp <= m.timestamp)
    }

    /// Queue contents as `(label, timestamp)` pairs, for snapshots and
    /// violation reports.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<(String, u64)>> {
        self.queues
            .iter()
            .map(|(sender, queue)| {
                (
                    sender.clone(),
                    queue
                        .iter()
                        .map(|m| (m.label.clone(), m.timestamp))
                        .collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(sender: &str, label: &str, timestamp: u64) -> Message {
        Message::new(sender, "R", label, None, timestamp)
    }

    #[test]
    fn test_clock_is_monotone() {
        let clock = MessageClock::new();
        let a = clock.next();
        let b = clock.next();
        assert!(a < b);
    }

    #[test]
    fn test_fifo_per_sender() {
        let mut buffer = MessageBuffer::default();
        buffer.deliver(msg("A", "first", 0)).unwrap();
        buffer.deliver(msg("A", "second", 1)).unwrap();
        buffer.deliver(msg("B", "other", 2)).unwrap();

        assert_eq!(buffer.head("A").unwrap().label, "first");
        assert_eq!(buffer.pop("A").unwrap().label, "first");
        assert_eq!(buffer.head("A").unwrap().label, "second");
        assert_eq!(buffer.depth("B"), 1);
    }

    #[test]
    fn test_bounded_buffer_rejects_overflow() {
        let mut buffer = MessageBuffer::bounded(1);
        buffer.deliver(msg("A", "first", 0)).unwrap();
        let err = buffer.deliver(msg("A", "second", 1)).unwrap_err();
        assert_eq!(err.capacity, 1);
        assert_eq!(buffer.depth("A"), 1);
    }

    #[test]
    fn test_unbounded_by_default() {
        let mut buffer = MessageBuffer::default();
        for i in 0..100 {
            buffer.deliver(msg("A", "m", i)).unwrap();
        }
        assert_eq!(buffer.depth("A"), 100);
    }

    #[test]
    fn test_head_is_oldest_detects_reordering() {
        let mut buffer = MessageBuffer::default();
        buffer.deliver(msg("A", "late", 5)).unwrap();
        buffer.deliver(msg("A", "early", 1)).unwrap();
        assert!(!buffer.head_is_oldest("A"));
        assert!(buffer.head_is_oldest("B"));
    }
}
