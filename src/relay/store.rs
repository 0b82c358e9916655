use super::message::{Message, MessageFilter, NewMessage};
use serde::{Deserialize, Serialize};

/// Message counters reported by `status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessageCounts {
    pub total: usize,
    pub unconsumed: usize,
    pub awaiting_response: usize,
}

/// Append-only log of messages in arrival order.
///
/// Not synchronized; the broker owns the only instance behind its mutex.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    evicted_total: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, new: NewMessage) -> &Message {
        self.push(Message::from_new(new, false))
    }

    pub(crate) fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        let last = self.messages.len() - 1;
        &self.messages[last]
    }

    /// First unconsumed match in arrival order, marked consumed when `consume` is set.
    pub fn receive(&mut self, filter: &MessageFilter, consume: bool) -> Option<Message> {
        let message = self.messages.iter_mut().find(|m| filter.matches(m))?;
        if consume {
            message.consumed = true;
        }
        Some(message.clone())
    }

    /// Every unconsumed match in arrival order. Never mutates.
    pub fn check(&self, filter: &MessageFilter) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn counts(&self) -> MessageCounts {
        self.messages
            .iter()
            .fold(MessageCounts::default(), |mut counts, m| {
                counts.total += 1;
                if !m.consumed {
                    counts.unconsumed += 1;
                }
                if m.awaiting_response {
                    counts.awaiting_response += 1;
                }
                counts
            })
    }

    /// Trim the log down to `max_messages` entries. `0` means unbounded.
    ///
    /// Consumed plain messages go first (oldest first), then any remaining
    /// oldest messages, requests included. Messages for which `pinned`
    /// returns true are kept.
    /// Returns the number of evicted messages.
    pub fn enforce_limit(&mut self, max_messages: usize, pinned: impl Fn(&str) -> bool) -> usize {
        if max_messages == 0 || self.messages.len() <= max_messages {
            return 0;
        }

        let mut excess = self.messages.len() - max_messages;
        let mut evict = vec![false; self.messages.len()];
        for consumed_pass in [true, false] {
            for (idx, message) in self.messages.iter().enumerate() {
                if excess == 0 {
                    break;
                }
                if evict[idx] || pinned(&message.id) {
                    continue;
                }
                if consumed_pass && (!message.consumed || message.awaiting_response) {
                    continue;
                }
                evict[idx] = true;
                excess -= 1;
            }
        }

        let mut flags = evict.into_iter();
        let before = self.messages.len();
        self.messages.retain(|_| !flags.next().unwrap_or(false));
        let removed = before - self.messages.len();
        self.evicted_total += removed as u64;
        removed
    }
}
