//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use subtle::ConstantTimeEq;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name
///
/// # Validation Rules
/// - Must be 3-63 characters
/// - Must contain only lowercase ASCII letters, digits, and hyphens
/// - Must start and end with a letter or digit
/// - Must not contain consecutive hyphens
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.len() < 3 || name.len() > 63 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 3-63 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only lowercase ASCII letters, digits, and hyphens allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Unique identifier for messages within a queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token proving the holder currently leases a message ("pop receipt")
///
/// Tokens are only ever compared for equality, in constant time. Their
/// internal structure is not part of the contract.
#[derive(Clone, Serialize, Deserialize)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub(crate) fn from_parts(sequence: u64, nonce: uuid::Uuid) -> Self {
        Self(format!("{:016x}{}", sequence, nonce.simple()))
    }

    /// Get token as string for handing back to the caller
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for LeaseToken {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for LeaseToken {}

impl std::fmt::Debug for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LeaseToken(<redacted>)")
    }
}

impl std::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LeaseToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "lease_token".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Sentinel used as the expiry of messages that never expire
    ///
    /// 9999-12-31T23:59:59Z, the largest instant the four-digit-year wire
    /// formats can carry.
    pub fn max() -> Self {
        Self(DateTime::<Utc>::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Check whether this is the "never expires" sentinel
    pub fn is_max(&self) -> bool {
        *self >= Self::max()
    }

    /// Add a duration, saturating at [`Timestamp::max`]
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let max = Self::max();
        match self.0.checked_add_signed(duration) {
            Some(dt) if dt < max.0 => Self(dt),
            _ => max,
        }
    }

    /// Get the signed duration from `earlier` to this timestamp
    pub fn signed_duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.signed_duration_since(earlier.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Lifetime
// ============================================================================

/// How long a message lives in the queue before it silently expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeToLive {
    Finite(Duration),
    Infinite,
}

impl TimeToLive {
    /// Create a finite time-to-live; must be strictly positive
    pub fn finite(duration: Duration) -> Result<Self, ValidationError> {
        if duration <= Duration::zero() {
            return Err(ValidationError::OutOfRange {
                field: "time_to_live".to_string(),
                message: "must be positive, or -1 for infinite".to_string(),
            });
        }

        Ok(Self::Finite(duration))
    }

    /// Interpret a wire value in seconds, where `-1` means "never expires"
    pub fn from_seconds(seconds: i64) -> Result<Self, ValidationError> {
        if seconds == -1 {
            return Ok(Self::Infinite);
        }

        let duration = Duration::try_seconds(seconds).ok_or_else(|| ValidationError::OutOfRange {
            field: "time_to_live".to_string(),
            message: format!("{} seconds is not representable", seconds),
        })?;
        Self::finite(duration)
    }

    /// Absolute expiry for a message inserted at `inserted_at`
    pub fn expiry_from(&self, inserted_at: Timestamp) -> Timestamp {
        match self {
            Self::Finite(duration) => inserted_at.saturating_add(*duration),
            Self::Infinite => Timestamp::max(),
        }
    }
}

// ============================================================================
// Queue Metadata
// ============================================================================

/// User-defined name/value pairs attached to a queue
///
/// Lookups ignore case; iteration yields names with the casing they were
/// inserted with. Inserting a name that differs only by case replaces the
/// existing entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HashMap<String, String>", into = "HashMap<String, String>")]
pub struct QueueMetadata {
    entries: BTreeMap<String, (String, String)>,
}

impl QueueMetadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metadata from name/value pairs, validating every name
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut metadata = Self::new();
        for (name, value) in pairs {
            metadata.insert(name, value)?;
        }
        Ok(metadata)
    }

    /// Insert or replace an entry
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let name = name.into();
        validate_metadata_name(&name)?;
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()));
        Ok(())
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries as `(name, value)` in case-insensitive name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

fn validate_metadata_name(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(ValidationError::Required {
            field: "metadata_name".to_string(),
        });
    };

    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "metadata_name".to_string(),
            message: format!("'{}' is not a valid identifier", name),
        });
    }

    Ok(())
}

impl TryFrom<HashMap<String, String>> for QueueMetadata {
    type Error = ValidationError;

    fn try_from(map: HashMap<String, String>) -> Result<Self, Self::Error> {
        Self::from_pairs(map)
    }
}

impl From<QueueMetadata> for HashMap<String, String> {
    fn from(metadata: QueueMetadata) -> Self {
        metadata.entries.into_values().collect()
    }
}

// ============================================================================
// Message Views
// ============================================================================

/// Result of sending a message; a new message starts visible and unleased
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueuedMessage {
    pub id: MessageId,
    pub content: String,
    pub inserted_at: Timestamp,
    pub expires_at: Timestamp,
    pub next_visible_at: Timestamp,
}

/// A message claimed by `receive`, carrying the lease token that fences
/// later updates and deletes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub content: String,
    pub lease_token: LeaseToken,
    pub inserted_at: Timestamp,
    pub expires_at: Timestamp,
    pub next_visible_at: Timestamp,
    pub dequeue_count: u32,
}

/// A message observed without claiming it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeekedMessage {
    pub id: MessageId,
    pub content: String,
    pub inserted_at: Timestamp,
    pub expires_at: Timestamp,
    pub dequeue_count: u32,
}

/// Outcome of a successful `update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReceipt {
    pub lease_token: LeaseToken,
    pub next_visible_at: Timestamp,
}

// ============================================================================
// Send and Receive Options
// ============================================================================

/// Configuration options for sending messages to queues
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Lifetime of the message; the configured default when unset
    pub time_to_live: Option<TimeToLive>,
    /// Delay before the message first becomes visible
    pub visibility_delay: Option<Duration>,
}

impl SendOptions {
    /// Create new send options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set time-to-live for message expiration
    pub fn with_time_to_live(mut self, ttl: TimeToLive) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Hide the message for `delay` after insertion
    pub fn with_visibility_delay(mut self, delay: Duration) -> Self {
        self.visibility_delay = Some(delay);
        self
    }
}

/// Configuration options for receiving messages from queues
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// Total number of messages to claim across all pages; unbounded when unset
    pub max_messages: Option<u32>,
    /// Number of messages claimed per page (at most 32)
    pub messages_per_page: Option<u32>,
    /// How long claimed messages stay hidden; the configured default when unset
    pub visibility_timeout: Option<Duration>,
}

impl ReceiveOptions {
    /// Create new receive options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of messages to receive
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = Some(max);
        self
    }

    /// Set the number of messages claimed per page
    pub fn with_messages_per_page(mut self, per_page: u32) -> Self {
        self.messages_per_page = Some(per_page);
        self
    }

    /// Set the visibility timeout applied to claimed messages
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
