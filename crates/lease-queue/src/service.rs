//! Service contracts exposed to the transport layer.
//!
//! [`QueueService`] is the single entry point for requests. Every operation
//! takes the [`Caller`] resolved by the transport layer, validates its
//! arguments and authorizes the caller before any state is touched.

use crate::access::{AccessPolicies, Caller, QueueOperation};
use crate::catalog::{ListQueuesOptions, Queue, QueueCatalog, QueueProperties, QueueSummary};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, MAX_BATCH_SIZE};
use crate::error::{QueueError, ValidationError};
use crate::message::{
    EnqueuedMessage, LeaseToken, MessageId, PeekedMessage, QueueMetadata, QueueName,
    ReceiveOptions, ReceivedMessage, SendOptions, TimeToLive, UpdateReceipt,
};
use crate::pager::{ContinuationToken, Page, Pager};
use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;

// ============================================================================
// Request and Response Types
// ============================================================================

/// Response to a successful `create_queue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreateQueueResponse {
    pub created: bool,
}

/// Options for browsing messages page by page
#[derive(Debug, Clone, Default)]
pub struct BrowseOptions {
    /// Page size; the configured default when unset
    pub page_size: Option<u32>,
    pub continuation: Option<ContinuationToken>,
}

impl BrowseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_continuation(mut self, continuation: ContinuationToken) -> Self {
        self.continuation = Some(continuation);
        self
    }
}

// ============================================================================
// Service Trait
// ============================================================================

/// Request/response contract of the queue engine
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Create a queue; fails if the name is taken
    async fn create_queue(
        &self,
        caller: &Caller,
        name: &QueueName,
        metadata: QueueMetadata,
    ) -> Result<CreateQueueResponse, QueueError>;

    /// Delete a queue and all of its messages
    async fn delete_queue(&self, caller: &Caller, name: &QueueName) -> Result<(), QueueError>;

    /// Replace queue metadata
    async fn set_metadata(
        &self,
        caller: &Caller,
        name: &QueueName,
        metadata: QueueMetadata,
    ) -> Result<(), QueueError>;

    async fn get_queue_properties(
        &self,
        caller: &Caller,
        name: &QueueName,
    ) -> Result<QueueProperties, QueueError>;

    /// One page of queues in name order
    async fn list_queues(
        &self,
        caller: &Caller,
        options: ListQueuesOptions,
    ) -> Result<Page<QueueSummary>, QueueError>;

    /// Append a message; it starts visible (after any delay) and unleased
    async fn send_message(
        &self,
        caller: &Caller,
        queue: &QueueName,
        content: String,
        options: SendOptions,
    ) -> Result<EnqueuedMessage, QueueError>;

    /// Lease messages, claiming them page by page until the limit is reached
    /// or the queue runs dry
    async fn receive_messages(
        &self,
        caller: &Caller,
        queue: &QueueName,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Observe up to `max_count` (default 1) messages without leasing them
    async fn peek_messages(
        &self,
        caller: &Caller,
        queue: &QueueName,
        max_count: Option<u32>,
    ) -> Result<Vec<PeekedMessage>, QueueError>;

    /// Page through the eligible messages of a queue without leasing them
    async fn browse_messages(
        &self,
        caller: &Caller,
        queue: &QueueName,
        options: BrowseOptions,
    ) -> Result<Page<PeekedMessage>, QueueError>;

    /// Re-arm a lease and optionally replace the message content
    async fn update_message(
        &self,
        caller: &Caller,
        queue: &QueueName,
        message_id: &MessageId,
        lease_token: &LeaseToken,
        visibility_timeout: Duration,
        content: Option<String>,
    ) -> Result<UpdateReceipt, QueueError>;

    /// Remove a leased message
    async fn delete_message(
        &self,
        caller: &Caller,
        queue: &QueueName,
        message_id: &MessageId,
        lease_token: &LeaseToken,
    ) -> Result<(), QueueError>;

    /// Remove every message regardless of lease state
    async fn clear_messages(&self, caller: &Caller, queue: &QueueName) -> Result<(), QueueError>;

    async fn get_access_policy(
        &self,
        caller: &Caller,
        queue: &QueueName,
    ) -> Result<AccessPolicies, QueueError>;

    /// Replace the access policies of a queue; at most 15 entries
    async fn set_access_policy(
        &self,
        caller: &Caller,
        queue: &QueueName,
        policies: AccessPolicies,
    ) -> Result<(), QueueError>;
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

/// Queue engine holding all state in process memory
pub struct InMemoryQueueService {
    catalog: QueueCatalog,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueueService {
    /// Create a service driven by the system clock
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a service driven by `clock`
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog: QueueCatalog::new(config),
            clock,
        }
    }

    pub fn catalog(&self) -> &QueueCatalog {
        &self.catalog
    }

    fn config(&self) -> &EngineConfig {
        self.catalog.config()
    }

    /// Lazy page-by-page variant of `receive_messages`
    ///
    /// Arguments are validated up front. Each page is claimed under its own
    /// write lock when the iterator is advanced. Without `max_messages` the
    /// iterator keeps claiming until a page comes back short, so messages
    /// made visible again between pages are claimed again.
    pub fn receive_pages(
        &self,
        caller: &Caller,
        queue_name: &QueueName,
        options: &ReceiveOptions,
    ) -> Result<ReceivedPages, QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::ReceiveMessages, queue_name)?;
        let per_page = resolve_page_size(options)?;
        let visibility_timeout = options
            .visibility_timeout
            .unwrap_or_else(|| self.config().default_visibility_timeout());
        queue
            .messages()
            .validate_visibility_timeout(visibility_timeout)?;

        let remaining = options.max_messages.map(|max| max as usize);

        Ok(ReceivedPages {
            queue,
            clock: Arc::clone(&self.clock),
            per_page,
            remaining,
            visibility_timeout,
            exhausted: false,
        })
    }

    fn authorize(
        &self,
        caller: &Caller,
        operation: QueueOperation,
        queue: Option<&Queue>,
    ) -> Result<(), QueueError> {
        let now = self.clock.now();
        let allowed = match queue {
            Some(queue) => caller.may_perform(operation, Some(&*queue.policies()), now),
            None => caller.may_perform(operation, None, now),
        };

        if allowed {
            return Ok(());
        }

        match queue {
            Some(queue) => warn!(queue = %queue.name(), operation = %operation, "Caller not authorized"),
            None => warn!(operation = %operation, "Caller not authorized"),
        }

        Err(QueueError::PermissionDenied {
            operation: operation.to_string(),
        })
    }

    /// Look up a queue and authorize `operation` against its policies
    ///
    /// A delegated caller is denied before learning whether the queue exists;
    /// only the account sees NotFound.
    fn authorized_queue(
        &self,
        caller: &Caller,
        operation: QueueOperation,
        name: &QueueName,
    ) -> Result<Arc<Queue>, QueueError> {
        match self.catalog.get(name) {
            Ok(queue) => {
                self.authorize(caller, operation, Some(&queue))?;
                Ok(queue)
            }
            Err(err) => {
                self.authorize(caller, operation, None)?;
                Err(err)
            }
        }
    }
}

impl Default for InMemoryQueueService {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Resolve the per-page claim size of a receive
///
/// A page larger than the total requested is rejected rather than truncated.
fn resolve_page_size(options: &ReceiveOptions) -> Result<u32, ValidationError> {
    if options.max_messages == Some(0) {
        return Err(ValidationError::OutOfRange {
            field: "max_messages".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    match (options.messages_per_page, options.max_messages) {
        (Some(per_page), _) if per_page == 0 || per_page > MAX_BATCH_SIZE => {
            Err(ValidationError::OutOfRange {
                field: "messages_per_page".to_string(),
                message: format!("must be 1-{}, got {}", MAX_BATCH_SIZE, per_page),
            })
        }
        (Some(per_page), Some(max)) if per_page > max => Err(ValidationError::OutOfRange {
            field: "messages_per_page".to_string(),
            message: format!(
                "page size {} exceeds max_messages {}",
                per_page, max
            ),
        }),
        (Some(per_page), _) => Ok(per_page),
        (None, max) => Ok(max.unwrap_or(1).min(MAX_BATCH_SIZE)),
    }
}

/// Lazy sequence of received pages; see [`InMemoryQueueService::receive_pages`]
pub struct ReceivedPages {
    queue: Arc<Queue>,
    clock: Arc<dyn Clock>,
    per_page: u32,
    /// Messages still to claim; unbounded when `None`
    remaining: Option<usize>,
    visibility_timeout: Duration,
    exhausted: bool,
}

impl Iterator for ReceivedPages {
    type Item = Result<Vec<ReceivedMessage>, QueueError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted || self.remaining == Some(0) {
            return None;
        }

        let count = self
            .remaining
            .map_or(self.per_page as usize, |remaining| {
                remaining.min(self.per_page as usize)
            }) as u32;
        let now = self.clock.now();
        let result = self
            .queue
            .messages_mut()
            .receive(count, self.visibility_timeout, now);

        match result {
            Ok(batch) => {
                if batch.len() < count as usize {
                    self.exhausted = true;
                }
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= batch.len();
                }

                if batch.is_empty() {
                    None
                } else {
                    Some(Ok(batch))
                }
            }
            Err(err) => {
                self.exhausted = true;
                Some(Err(err))
            }
        }
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn create_queue(
        &self,
        caller: &Caller,
        name: &QueueName,
        metadata: QueueMetadata,
    ) -> Result<CreateQueueResponse, QueueError> {
        self.authorize(caller, QueueOperation::CreateQueue, None)?;
        self.catalog
            .create(name.clone(), metadata, self.clock.now())?;
        Ok(CreateQueueResponse { created: true })
    }

    async fn delete_queue(&self, caller: &Caller, name: &QueueName) -> Result<(), QueueError> {
        self.authorize(caller, QueueOperation::DeleteQueue, None)?;
        self.catalog.delete(name)
    }

    async fn set_metadata(
        &self,
        caller: &Caller,
        name: &QueueName,
        metadata: QueueMetadata,
    ) -> Result<(), QueueError> {
        self.authorize(caller, QueueOperation::SetMetadata, None)?;
        self.catalog.set_metadata(name, metadata)
    }

    async fn get_queue_properties(
        &self,
        caller: &Caller,
        name: &QueueName,
    ) -> Result<QueueProperties, QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::GetProperties, name)?;
        Ok(queue.properties(self.clock.now()))
    }

    async fn list_queues(
        &self,
        caller: &Caller,
        options: ListQueuesOptions,
    ) -> Result<Page<QueueSummary>, QueueError> {
        self.authorize(caller, QueueOperation::ListQueues, None)?;
        self.catalog.list(&options)
    }

    async fn send_message(
        &self,
        caller: &Caller,
        queue: &QueueName,
        content: String,
        options: SendOptions,
    ) -> Result<EnqueuedMessage, QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::SendMessage, queue)?;
        let time_to_live = options
            .time_to_live
            .unwrap_or_else(|| TimeToLive::Finite(self.config().default_message_ttl()));
        let visibility_delay = options.visibility_delay.unwrap_or_else(Duration::zero);

        let message =
            queue
                .messages_mut()
                .enqueue(content, time_to_live, visibility_delay, self.clock.now())?;
        Ok(message)
    }

    async fn receive_messages(
        &self,
        caller: &Caller,
        queue: &QueueName,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut pages = self.receive_pages(caller, queue, &options)?;

        // An eager drain claims at most what was eligible up front
        if pages.remaining.is_none() {
            let eligible = pages.queue.messages().approximate_count(self.clock.now());
            pages.remaining = Some(eligible);
        }

        let mut received = Vec::new();
        for page in pages {
            received.extend(page?);
        }

        debug!(queue = %queue, count = received.len(), "Receive completed");
        Ok(received)
    }

    async fn peek_messages(
        &self,
        caller: &Caller,
        queue: &QueueName,
        max_count: Option<u32>,
    ) -> Result<Vec<PeekedMessage>, QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::PeekMessages, queue)?;
        let peeked = queue
            .messages()
            .peek(max_count.unwrap_or(1), self.clock.now())?;
        Ok(peeked)
    }

    async fn browse_messages(
        &self,
        caller: &Caller,
        queue: &QueueName,
        options: BrowseOptions,
    ) -> Result<Page<PeekedMessage>, QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::BrowseMessages, queue)?;
        let pager = Pager::new(
            &[("queue", queue.name().as_str())],
            options
                .page_size
                .unwrap_or(self.config().default_list_page_size),
        )?;
        let after: Option<u64> = pager.resume_after(options.continuation.as_ref())?;

        let messages = queue.messages();
        let page = pager.paginate(messages.browse(after, self.clock.now()))?;
        Ok(page)
    }

    async fn update_message(
        &self,
        caller: &Caller,
        queue: &QueueName,
        message_id: &MessageId,
        lease_token: &LeaseToken,
        visibility_timeout: Duration,
        content: Option<String>,
    ) -> Result<UpdateReceipt, QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::UpdateMessage, queue)?;
        let receipt = queue.messages_mut().update(
            message_id,
            lease_token,
            visibility_timeout,
            content,
            self.clock.now(),
        )?;
        Ok(receipt)
    }

    async fn delete_message(
        &self,
        caller: &Caller,
        queue: &QueueName,
        message_id: &MessageId,
        lease_token: &LeaseToken,
    ) -> Result<(), QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::DeleteMessage, queue)?;
        queue
            .messages_mut()
            .delete(message_id, lease_token, self.clock.now())?;
        Ok(())
    }

    async fn clear_messages(&self, caller: &Caller, queue: &QueueName) -> Result<(), QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::ClearMessages, queue)?;
        let removed = queue.messages_mut().clear();
        info!(queue = %queue.name(), count = removed, "Messages cleared");
        Ok(())
    }

    async fn get_access_policy(
        &self,
        caller: &Caller,
        queue: &QueueName,
    ) -> Result<AccessPolicies, QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::GetAccessPolicy, queue)?;
        let policies = queue.policies().get();
        Ok(policies)
    }

    async fn set_access_policy(
        &self,
        caller: &Caller,
        queue: &QueueName,
        policies: AccessPolicies,
    ) -> Result<(), QueueError> {
        let queue = self.authorized_queue(caller, QueueOperation::SetAccessPolicy, queue)?;
        let count = policies.len();
        queue.policies_mut().set(policies)?;
        info!(queue = %queue.name(), count, "Access policies replaced");
        Ok(())
    }
}
