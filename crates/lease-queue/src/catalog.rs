//! Registry of queues by name.

use crate::access::AccessPolicyRegistry;
use crate::config::EngineConfig;
use crate::error::QueueError;
use crate::lease::LeaseManager;
use crate::message::{QueueMetadata, QueueName, Timestamp};
use crate::pager::{ContinuationToken, Page, Pager, Pages};
use crate::store::MessageStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;

// ============================================================================
// Queue
// ============================================================================

/// A named queue with its messages, metadata and access policies
///
/// Each part sits behind its own lock. Message operations on one queue are
/// serialized by the store's write lock; other queues are unaffected.
#[derive(Debug)]
pub struct Queue {
    name: QueueName,
    created_at: Timestamp,
    metadata: RwLock<QueueMetadata>,
    messages: RwLock<MessageStore>,
    policies: RwLock<AccessPolicyRegistry>,
}

impl Queue {
    fn new(name: QueueName, metadata: QueueMetadata, config: &EngineConfig, now: Timestamp) -> Self {
        let store = MessageStore::new(
            name.clone(),
            LeaseManager::new(config.max_visibility_timeout()),
        );

        Self {
            name,
            created_at: now,
            metadata: RwLock::new(metadata),
            messages: RwLock::new(store),
            policies: RwLock::new(AccessPolicyRegistry::new()),
        }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Snapshot of the current metadata
    pub fn metadata(&self) -> QueueMetadata {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace metadata wholesale
    pub fn set_metadata(&self, metadata: QueueMetadata) {
        *self
            .metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner) = metadata;
    }

    /// Shared access for peek, browse and counting
    pub fn messages(&self) -> RwLockReadGuard<'_, MessageStore> {
        self.messages.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access for every state-changing message operation
    pub fn messages_mut(&self) -> RwLockWriteGuard<'_, MessageStore> {
        self.messages.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policies(&self) -> RwLockReadGuard<'_, AccessPolicyRegistry> {
        self.policies.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policies_mut(&self) -> RwLockWriteGuard<'_, AccessPolicyRegistry> {
        self.policies.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Properties snapshot as of `now`
    pub fn properties(&self, now: Timestamp) -> QueueProperties {
        QueueProperties {
            name: self.name.clone(),
            metadata: self.metadata(),
            approximate_message_count: self.messages().approximate_count(now),
            created_at: self.created_at,
        }
    }
}

/// Queue entry as returned by a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub name: QueueName,
    /// Present only when the listing asked for metadata
    pub metadata: Option<QueueMetadata>,
}

/// Queue properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueProperties {
    pub name: QueueName,
    pub metadata: QueueMetadata,
    pub approximate_message_count: usize,
    pub created_at: Timestamp,
}

/// Options for listing queues
#[derive(Debug, Clone, Default)]
pub struct ListQueuesOptions {
    pub prefix: Option<String>,
    pub include_metadata: bool,
    /// Page size; the configured default when unset
    pub page_size: Option<u32>,
    pub continuation: Option<ContinuationToken>,
}

impl ListQueuesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_metadata(mut self) -> Self {
        self.include_metadata = true;
        self
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
// QueueCatalog
// ============================================================================

/// Owns every queue, keyed by name
#[derive(Debug)]
pub struct QueueCatalog {
    queues: RwLock<BTreeMap<QueueName, Arc<Queue>>>,
    config: EngineConfig,
}

impl QueueCatalog {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            queues: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a queue; an existing queue is never modified
    pub fn create(
        &self,
        name: QueueName,
        metadata: QueueMetadata,
        now: Timestamp,
    ) -> Result<Arc<Queue>, QueueError> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);

        if queues.contains_key(&name) {
            return Err(QueueError::QueueAlreadyExists { queue_name: name });
        }

        let queue = Arc::new(Queue::new(name.clone(), metadata, &self.config, now));
        queues.insert(name.clone(), Arc::clone(&queue));

        info!(queue = %name, "Queue created");
        Ok(queue)
    }

    /// Remove a queue and everything it holds
    pub fn delete(&self, name: &QueueName) -> Result<(), QueueError> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);

        match queues.remove(name) {
            Some(_) => {
                info!(queue = %name, "Queue deleted");
                Ok(())
            }
            None => Err(QueueError::QueueNotFound {
                queue_name: name.clone(),
            }),
        }
    }

    pub fn get(&self, name: &QueueName) -> Result<Arc<Queue>, QueueError> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: name.clone(),
            })
    }

    pub fn len(&self) -> usize {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace a queue's metadata wholesale
    pub fn set_metadata(&self, name: &QueueName, metadata: QueueMetadata) -> Result<(), QueueError> {
        self.get(name)?.set_metadata(metadata);
        info!(queue = %name, "Queue metadata replaced");
        Ok(())
    }

    pub fn properties(&self, name: &QueueName, now: Timestamp) -> Result<QueueProperties, QueueError> {
        Ok(self.get(name)?.properties(now))
    }

    /// One page of queues in name order
    pub fn list(&self, options: &ListQueuesOptions) -> Result<Page<QueueSummary>, QueueError> {
        let prefix = options.prefix.as_deref().unwrap_or("");
        let pager = Pager::new(
            &[("prefix", prefix)],
            options
                .page_size
                .unwrap_or(self.config.default_list_page_size),
        )?;
        let after: Option<String> = pager.resume_after(options.continuation.as_ref())?;

        // Snapshot the matching queues so no lock is held while metadata is read
        let matching: Vec<Arc<Queue>> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .skip_while(|(name, _)| after.as_deref().is_some_and(|after| name.as_str() <= after))
            .filter(|(name, _)| name.as_str().starts_with(prefix))
            .map(|(_, queue)| Arc::clone(queue))
            .collect();

        let page = pager.paginate(matching.iter().map(|queue| {
            let summary = QueueSummary {
                name: queue.name().clone(),
                metadata: options.include_metadata.then(|| queue.metadata()),
            };
            (queue.name().as_str().to_string(), summary)
        }))?;

        Ok(page)
    }

    /// Lazy iterator over every page of a listing, starting at `options.continuation`
    pub fn list_pages(
        &self,
        options: ListQueuesOptions,
    ) -> Pages<
        QueueSummary,
        impl FnMut(Option<&ContinuationToken>) -> Result<Page<QueueSummary>, QueueError> + '_,
    > {
        let start = options.continuation.clone();

        Pages::new(start, move |cursor| {
            let options = ListQueuesOptions {
                continuation: cursor.cloned(),
                ..options.clone()
            };
            self.list(&options)
        })
    }
}
