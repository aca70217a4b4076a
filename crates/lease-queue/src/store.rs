//! Per-queue message storage and the visibility state machine.
//!
//! Messages are kept in insertion order, keyed by a monotonically increasing
//! sequence number. A message is either visible or leased; a leased message
//! whose deadline has passed is eligible again without changing state until
//! the next claim. Expired messages are never returned and are dropped by the
//! next writer that runs into them.
//!
//! The store performs no locking of its own. Callers wrap it in a `RwLock`
//! and take the write lock for `enqueue`, `receive`, `update`, `delete` and
//! `clear`.

use crate::config::MAX_BATCH_SIZE;
use crate::error::{QueueError, ValidationError};
use crate::lease::LeaseManager;
use crate::message::{
    EnqueuedMessage, LeaseToken, MessageId, PeekedMessage, QueueName, ReceivedMessage,
    TimeToLive, Timestamp, UpdateReceipt,
};
use chrono::Duration;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

// ============================================================================
// Stored Message
// ============================================================================

#[derive(Debug, Clone)]
enum VisibilityState {
    Visible,
    Leased { token: LeaseToken },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    content: String,
    inserted_at: Timestamp,
    expires_at: Timestamp,
    next_visible_at: Timestamp,
    dequeue_count: u32,
    state: VisibilityState,
}

impl StoredMessage {
    fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Visible (or leased with an elapsed deadline) and not expired
    fn is_eligible(&self, now: Timestamp) -> bool {
        !self.is_expired(now) && self.next_visible_at <= now
    }

    fn current_token(&self) -> Option<&LeaseToken> {
        match &self.state {
            VisibilityState::Visible => None,
            VisibilityState::Leased { token } => Some(token),
        }
    }

    fn to_peeked(&self) -> PeekedMessage {
        PeekedMessage {
            id: self.id.clone(),
            content: self.content.clone(),
            inserted_at: self.inserted_at,
            expires_at: self.expires_at,
            dequeue_count: self.dequeue_count,
        }
    }
}

// ============================================================================
// MessageStore
// ============================================================================

/// Ordered collection of the messages of one queue
#[derive(Debug)]
pub struct MessageStore {
    queue_name: QueueName,
    messages: BTreeMap<u64, StoredMessage>,
    index: HashMap<MessageId, u64>,
    next_sequence: u64,
    leases: LeaseManager,
}

impl MessageStore {
    /// Create an empty store for `queue_name`
    pub fn new(queue_name: QueueName, leases: LeaseManager) -> Self {
        Self {
            queue_name,
            messages: BTreeMap::new(),
            index: HashMap::new(),
            next_sequence: 0,
            leases,
        }
    }

    /// Number of messages held, including leased and expired ones
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check a visibility timeout against the configured maximum
    pub fn validate_visibility_timeout(&self, timeout: Duration) -> Result<(), ValidationError> {
        self.leases.validate_visibility_timeout(timeout)
    }

    /// Append a new visible message
    pub fn enqueue(
        &mut self,
        content: String,
        time_to_live: TimeToLive,
        visibility_delay: Duration,
        now: Timestamp,
    ) -> Result<EnqueuedMessage, QueueError> {
        if visibility_delay < Duration::zero()
            || visibility_delay > self.leases.max_visibility_timeout()
        {
            return Err(ValidationError::OutOfRange {
                field: "visibility_delay".to_string(),
                message: format!(
                    "must be between 0 and {} seconds",
                    self.leases.max_visibility_timeout().num_seconds()
                ),
            }
            .into());
        }

        if let TimeToLive::Finite(ttl) = time_to_live {
            TimeToLive::finite(ttl)?;

            if visibility_delay >= ttl {
                return Err(ValidationError::OutOfRange {
                    field: "visibility_delay".to_string(),
                    message: "must be shorter than the time-to-live".to_string(),
                }
                .into());
            }
        }

        self.purge_expired(now);

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let message = StoredMessage {
            id: MessageId::new(),
            content,
            inserted_at: now,
            expires_at: time_to_live.expiry_from(now),
            next_visible_at: now.saturating_add(visibility_delay),
            dequeue_count: 0,
            state: VisibilityState::Visible,
        };

        debug!(
            queue = %self.queue_name,
            message_id = %message.id,
            expires_at = %message.expires_at,
            "Message enqueued"
        );

        let enqueued = EnqueuedMessage {
            id: message.id.clone(),
            content: message.content.clone(),
            inserted_at: message.inserted_at,
            expires_at: message.expires_at,
            next_visible_at: message.next_visible_at,
        };

        self.index.insert(message.id.clone(), sequence);
        self.messages.insert(sequence, message);

        Ok(enqueued)
    }

    /// Lease up to `max_count` of the oldest eligible messages
    pub fn receive(
        &mut self,
        max_count: u32,
        visibility_timeout: Duration,
        now: Timestamp,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        validate_batch_size(max_count)?;
        self.leases.validate_visibility_timeout(visibility_timeout)?;

        self.purge_expired(now);

        let leases = &self.leases;
        let received: Vec<ReceivedMessage> = self
            .messages
            .values_mut()
            .filter(|message| message.is_eligible(now))
            .take(max_count as usize)
            .map(|message| {
                let grant = leases.next_lease(now, visibility_timeout);
                message.dequeue_count = message.dequeue_count.saturating_add(1);
                message.next_visible_at = grant.next_visible_at;
                message.state = VisibilityState::Leased {
                    token: grant.token.clone(),
                };

                ReceivedMessage {
                    id: message.id.clone(),
                    content: message.content.clone(),
                    lease_token: grant.token,
                    inserted_at: message.inserted_at,
                    expires_at: message.expires_at,
                    next_visible_at: message.next_visible_at,
                    dequeue_count: message.dequeue_count,
                }
            })
            .collect();

        debug!(
            queue = %self.queue_name,
            requested = max_count,
            count = received.len(),
            "Messages leased"
        );

        Ok(received)
    }

    /// Observe up to `max_count` of the oldest eligible messages without claiming them
    pub fn peek(&self, max_count: u32, now: Timestamp) -> Result<Vec<PeekedMessage>, QueueError> {
        validate_batch_size(max_count)?;

        Ok(self
            .messages
            .values()
            .filter(|message| message.is_eligible(now))
            .take(max_count as usize)
            .map(StoredMessage::to_peeked)
            .collect())
    }

    /// Eligible messages in insertion order, strictly after sequence `after`
    pub fn browse(
        &self,
        after: Option<u64>,
        now: Timestamp,
    ) -> impl Iterator<Item = (u64, PeekedMessage)> + '_ {
        let lower = match after {
            Some(sequence) => Bound::Excluded(sequence),
            None => Bound::Unbounded,
        };

        self.messages
            .range((lower, Bound::Unbounded))
            .filter(move |(_, message)| message.is_eligible(now))
            .map(|(sequence, message)| (*sequence, message.to_peeked()))
    }

    /// Re-arm the lease of a message, optionally replacing its content
    pub fn update(
        &mut self,
        message_id: &MessageId,
        lease_token: &LeaseToken,
        visibility_timeout: Duration,
        content: Option<String>,
        now: Timestamp,
    ) -> Result<UpdateReceipt, QueueError> {
        self.leases.validate_visibility_timeout(visibility_timeout)?;

        let sequence = self.admitted_sequence(message_id, lease_token, now)?;
        let grant = self.leases.next_lease(now, visibility_timeout);

        let Some(message) = self.messages.get_mut(&sequence) else {
            return Err(self.rejected(message_id));
        };

        if let Some(content) = content {
            message.content = content;
        }
        message.next_visible_at = grant.next_visible_at;
        message.state = VisibilityState::Leased {
            token: grant.token.clone(),
        };

        debug!(
            queue = %self.queue_name,
            message_id = %message_id,
            next_visible_at = %grant.next_visible_at,
            "Message lease updated"
        );

        Ok(UpdateReceipt {
            lease_token: grant.token,
            next_visible_at: grant.next_visible_at,
        })
    }

    /// Permanently remove a leased message
    pub fn delete(
        &mut self,
        message_id: &MessageId,
        lease_token: &LeaseToken,
        now: Timestamp,
    ) -> Result<(), QueueError> {
        let sequence = self.admitted_sequence(message_id, lease_token, now)?;

        self.messages.remove(&sequence);
        self.index.remove(message_id);

        debug!(queue = %self.queue_name, message_id = %message_id, "Message deleted");
        Ok(())
    }

    /// Remove every message regardless of state, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.messages.len();
        self.messages.clear();
        self.index.clear();

        debug!(queue = %self.queue_name, count = removed, "Queue cleared");
        removed
    }

    /// Best-effort count of messages a `receive` at `now` could claim
    pub fn approximate_count(&self, now: Timestamp) -> usize {
        self.messages
            .values()
            .filter(|message| message.is_eligible(now))
            .count()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Resolve the sequence of a message whose current lease admits `lease_token`
    fn admitted_sequence(
        &self,
        message_id: &MessageId,
        lease_token: &LeaseToken,
        now: Timestamp,
    ) -> Result<u64, QueueError> {
        let admitted = self
            .index
            .get(message_id)
            .and_then(|sequence| self.messages.get(sequence).map(|m| (*sequence, m)))
            .filter(|(_, message)| !message.is_expired(now))
            .filter(|(_, message)| self.leases.admits(message.current_token(), lease_token));

        match admitted {
            Some((sequence, _)) => Ok(sequence),
            None => Err(self.rejected(message_id)),
        }
    }

    fn rejected(&self, message_id: &MessageId) -> QueueError {
        warn!(
            queue = %self.queue_name,
            message_id = %message_id,
            "Lease token rejected"
        );

        QueueError::LeaseRejected {
            message_id: message_id.clone(),
        }
    }

    fn purge_expired(&mut self, now: Timestamp) {
        let expired: Vec<u64> = self
            .messages
            .iter()
            .filter(|(_, message)| message.is_expired(now))
            .map(|(sequence, _)| *sequence)
            .collect();

        if expired.is_empty() {
            return;
        }

        for sequence in &expired {
            if let Some(message) = self.messages.remove(sequence) {
                self.index.remove(&message.id);
            }
        }

        debug!(
            queue = %self.queue_name,
            count = expired.len(),
            "Expired messages reclaimed"
        );
    }
}

fn validate_batch_size(max_count: u32) -> Result<(), ValidationError> {
    if max_count == 0 || max_count > MAX_BATCH_SIZE {
        return Err(ValidationError::OutOfRange {
            field: "max_count".to_string(),
            message: format!("must be 1-{}, got {}", MAX_BATCH_SIZE, max_count),
        });
    }

    Ok(())
}
