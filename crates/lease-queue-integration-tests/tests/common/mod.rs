//! Common test utilities for lease-queue integration tests
//!
//! This module provides:
//! - A service wired to a manually driven clock
//! - Helpers for creating queues and filling them with messages
//! - One-time tracing initialization

use chrono::Duration;
use lease_queue::{
    Caller, Clock, EngineConfig, EnqueuedMessage, InMemoryQueueService, ManualClock,
    QueueMetadata, QueueName, QueueService, SendOptions, Timestamp,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a test-friendly subscriber; later calls are no-ops
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lease_queue=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Service plus the clock that drives it
#[allow(dead_code)]
pub struct TestEngine {
    pub service: Arc<InMemoryQueueService>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();

        let clock = Arc::new(ManualClock::default());
        let service = Arc::new(InMemoryQueueService::with_clock(config, clock.clone()));
        Self { service, clock }
    }

    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    pub fn clock_now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Create a queue with no metadata
    pub async fn create_queue(&self, name: &str) -> QueueName {
        let queue = queue_name(name);
        self.service
            .create_queue(&Caller::Account, &queue, QueueMetadata::new())
            .await
            .expect("queue creation should succeed");
        tracing::debug!(queue = %queue, "Test queue created");
        queue
    }

    /// Send `count` messages with contents `prefix-0`, `prefix-1`, ...
    pub async fn fill(&self, queue: &QueueName, prefix: &str, count: usize) -> Vec<EnqueuedMessage> {
        let mut sent = Vec::with_capacity(count);
        for i in 0..count {
            sent.push(self.send(queue, &format!("{}-{}", prefix, i)).await);
        }
        tracing::debug!(queue = %queue, count, "Test queue filled");
        sent
    }

    pub async fn send(&self, queue: &QueueName, content: &str) -> EnqueuedMessage {
        self.service
            .send_message(&Caller::Account, queue, content.to_string(), SendOptions::new())
            .await
            .expect("send should succeed")
    }
}

#[allow(dead_code)]
pub fn queue_name(name: &str) -> QueueName {
    QueueName::new(name.to_string()).expect("test queue name should be valid")
}
