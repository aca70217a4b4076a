//! Lease token issuance and visibility deadlines.
//!
//! The lease manager holds no message state. It mints tokens, computes when a
//! leased message becomes visible again and decides whether a presented token
//! admits a fenced operation. Every admission failure looks the same to the
//! caller.

use crate::error::ValidationError;
use crate::message::{LeaseToken, Timestamp};
use chrono::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;

/// A freshly granted lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGrant {
    pub token: LeaseToken,
    pub next_visible_at: Timestamp,
}

/// Computes lease tokens and visibility deadlines
#[derive(Debug)]
pub struct LeaseManager {
    sequence: AtomicU64,
    max_visibility_timeout: Duration,
}

impl LeaseManager {
    /// Create a manager accepting visibility timeouts up to `max_visibility_timeout`
    pub fn new(max_visibility_timeout: Duration) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            max_visibility_timeout,
        }
    }

    /// Upper bound accepted by [`validate_visibility_timeout`](Self::validate_visibility_timeout)
    pub fn max_visibility_timeout(&self) -> Duration {
        self.max_visibility_timeout
    }

    /// Check that `timeout` lies within `0..=max_visibility_timeout`
    pub fn validate_visibility_timeout(&self, timeout: Duration) -> Result<(), ValidationError> {
        if timeout < Duration::zero() || timeout > self.max_visibility_timeout {
            return Err(ValidationError::OutOfRange {
                field: "visibility_timeout".to_string(),
                message: format!(
                    "must be between 0 and {} seconds, got {}",
                    self.max_visibility_timeout.num_seconds(),
                    timeout.num_seconds()
                ),
            });
        }

        Ok(())
    }

    /// Grant a new lease starting at `now`
    ///
    /// The previous token, if any, plays no part in the new one: the sequence
    /// number guarantees uniqueness and the random component makes the token
    /// unguessable.
    pub fn next_lease(&self, now: Timestamp, visibility_timeout: Duration) -> LeaseGrant {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        LeaseGrant {
            token: LeaseToken::from_parts(sequence, Uuid::new_v4()),
            next_visible_at: now.saturating_add(visibility_timeout),
        }
    }

    /// Decide whether `presented` admits an update or delete
    ///
    /// Only the token currently held by the message is admitted. A message
    /// that holds no token (never received) admits nothing.
    pub fn admits(&self, current: Option<&LeaseToken>, presented: &LeaseToken) -> bool {
        match current {
            Some(current) => current == presented,
            None => false,
        }
    }
}

impl Default for LeaseManager {
    fn default() -> Self {
        Self::new(Duration::days(7))
    }
}
