//! Integration tests for engine configuration
//!
//! These tests verify:
//! - Configured defaults flow into message and listing operations
//! - File and environment sources are layered

mod common;

use chrono::Duration;
use common::TestEngine;
use lease_queue::{Caller, EngineConfig, ListQueuesOptions, QueueService, ReceiveOptions};
use serial_test::serial;
use std::io::Write;

#[tokio::test]
async fn test_configured_defaults_apply() {
    let engine = TestEngine::with_config(EngineConfig {
        default_visibility_timeout_secs: 5,
        default_message_ttl_secs: 60,
        default_list_page_size: 1,
        ..EngineConfig::default()
    });
    let queue = engine.create_queue("configured").await;
    engine.create_queue("configured-too").await;

    let sent = engine.send(&queue, "a").await;
    assert_eq!(
        sent.expires_at,
        sent.inserted_at.saturating_add(Duration::seconds(60))
    );

    let received = engine
        .service
        .receive_messages(&Caller::Account, &queue, ReceiveOptions::new())
        .await
        .unwrap();
    assert_eq!(
        received[0].next_visible_at,
        engine.clock_now().saturating_add(Duration::seconds(5))
    );

    let page = engine
        .service
        .list_queues(&Caller::Account, ListQueuesOptions::new())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert!(page.continuation.is_some());
}

#[tokio::test]
async fn test_visibility_timeout_capped_by_configuration() {
    let engine = TestEngine::with_config(EngineConfig {
        max_visibility_timeout_secs: 60,
        ..EngineConfig::default()
    });
    let queue = engine.create_queue("capped").await;
    engine.send(&queue, "a").await;

    let result = engine
        .service
        .receive_messages(
            &Caller::Account,
            &queue,
            ReceiveOptions::new().with_visibility_timeout(Duration::seconds(61)),
        )
        .await;
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_load_layers_file_and_environment() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "default_visibility_timeout_secs: 15").unwrap();
    writeln!(file, "default_list_page_size: 250").unwrap();

    std::env::set_var("LQ__DEFAULT_LIST_PAGE_SIZE", "100");
    let loaded = EngineConfig::load(Some(file.path()));
    std::env::remove_var("LQ__DEFAULT_LIST_PAGE_SIZE");

    let config = loaded.unwrap();
    assert_eq!(config.default_visibility_timeout_secs, 15);
    assert_eq!(config.default_list_page_size, 100);
}

#[test]
#[serial]
fn test_load_missing_file_fails() {
    let result = EngineConfig::load(Some(std::path::Path::new("/nonexistent/lease-queue.yaml")));
    assert!(result.is_err());
}
