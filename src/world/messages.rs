//! Component Messaging
//!
//! `send_message` invokes handlers synchronously on the target component;
//! `post_message` enqueues onto a priority queue keyed by due time, drained
//! by the world each frame before the update phases run.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::interner::{self, Symbol};

use super::component::ComponentHandle;

/// A message: an interned id plus an arbitrary payload.
pub struct Message {
    pub id: Symbol,
    pub payload: Box<dyn Any + Send + Sync>,
}

impl Message {
    #[must_use]
    pub fn new(id: &str, payload: impl Any + Send + Sync) -> Self {
        Self {
            id: interner::intern(id),
            payload: Box::new(payload),
        }
    }

    #[must_use]
    pub fn is(&self, id: &str) -> bool {
        interner::get(id) == Some(self.id)
    }

    #[must_use]
    pub fn payload_as<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

struct QueuedMessage {
    due_time: f64,
    sequence: u64,
    target: ComponentHandle,
    message: Message,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.due_time == other.due_time && self.sequence == other.sequence
    }
}
impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest due time pops
        // first, with the queue sequence as a stable tie-break.
        other
            .due_time
            .total_cmp(&self.due_time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Delayed-message queue owned by the world.
pub struct MessageQueue {
    heap: BinaryHeap<QueuedMessage>,
    sequence: u64,
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            sequence: 0,
        }
    }

    /// Enqueues `message` for delivery once the world clock reaches
    /// `now + delay_seconds`.
    pub fn post(&mut self, target: ComponentHandle, message: Message, now: f64, delay_seconds: f64) {
        self.sequence += 1;
        self.heap.push(QueuedMessage {
            due_time: now + delay_seconds.max(0.0),
            sequence: self.sequence,
            target,
            message,
        });
    }

    /// Pops every message due at `now`, in due-time order.
    pub fn drain_due(&mut self, now: f64) -> Vec<(ComponentHandle, Message)> {
        let mut due = Vec::new();
        while let Some(head) = self.heap.peek() {
            if head.due_time > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            due.push((entry.target, entry.message));
        }
        due
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_due_order() {
        let mut queue = MessageQueue::new();
        let target = ComponentHandle::INVALID;
        queue.post(target, Message::new("m_b", 2u32), 0.0, 2.0);
        queue.post(target, Message::new("m_a", 1u32), 0.0, 1.0);
        queue.post(target, Message::new("m_c", 3u32), 0.0, 3.0);

        let due = queue.drain_due(2.5);
        assert_eq!(due.len(), 2);
        assert!(due[0].1.is("m_a"));
        assert!(due[1].1.is("m_b"));

        let due = queue.drain_due(10.0);
        assert_eq!(due.len(), 1);
        assert!(due[0].1.is("m_c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn same_due_time_is_fifo() {
        let mut queue = MessageQueue::new();
        let target = ComponentHandle::INVALID;
        queue.post(target, Message::new("first", ()), 0.0, 1.0);
        queue.post(target, Message::new("second", ()), 0.0, 1.0);
        let due = queue.drain_due(1.0);
        assert!(due[0].1.is("first"));
        assert!(due[1].1.is("second"));
    }
}
