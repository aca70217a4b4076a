//! # Lease Queue
//!
//! In-process queue engine with lease-based visibility timeouts.
//!
//! This library provides:
//! - A message store where receiving a message leases it for a visibility
//!   timeout instead of removing it
//! - Lease tokens that fence updates and deletes against stale consumers
//! - Message lifetimes, including messages that never expire
//! - Named access policies for delegated callers
//! - Cursor-based pagination over queues and messages
//!
//! Time never advances on its own: every expiry decision compares stored
//! timestamps against a [`Clock`].
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Identifiers, timestamps and message views
//! - [`config`] - Engine defaults and limits
//! - [`clock`] - Time sources
//! - [`lease`] - Lease token issuance and admission
//! - [`store`] - Per-queue message storage
//! - [`access`] - Access policies and caller authorization
//! - [`pager`] - Continuation-token pagination
//! - [`catalog`] - Queue registry
//! - [`service`] - The request/response contract and its in-memory implementation

// Module declarations
pub mod access;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod lease;
pub mod message;
pub mod pager;
pub mod service;
pub mod store;

// Re-export commonly used types at crate root for convenience
pub use access::{
    AccessPolicies, AccessPolicy, AccessPolicyRegistry, Caller, DelegatedAccess, QueueOperation,
    QueuePermissions,
};
pub use catalog::{ListQueuesOptions, Queue, QueueCatalog, QueueProperties, QueueSummary};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crate::config::EngineConfig;
pub use error::{ConfigurationError, ErrorKind, QueueError, ValidationError};
pub use message::{
    EnqueuedMessage, LeaseToken, MessageId, PeekedMessage, QueueMetadata, QueueName,
    ReceiveOptions, ReceivedMessage, SendOptions, TimeToLive, Timestamp, UpdateReceipt,
};
pub use pager::{ContinuationToken, Page};
pub use service::{
    BrowseOptions, CreateQueueResponse, InMemoryQueueService, QueueService, ReceivedPages,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
