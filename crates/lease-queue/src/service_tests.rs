//! Tests for the in-memory queue service.

use super::*;
use crate::access::{AccessPolicy, DelegatedAccess, QueuePermissions};
use crate::clock::ManualClock;
use crate::error::ErrorKind;
use crate::message::Timestamp;
use std::collections::HashSet;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    service: InMemoryQueueService,
    clock: Arc<ManualClock>,
    queue: QueueName,
}

async fn harness() -> Harness {
    let clock = Arc::new(ManualClock::default());
    let service = InMemoryQueueService::with_clock(EngineConfig::default(), clock.clone());
    let queue = QueueName::new("work-items".to_string()).unwrap();

    service
        .create_queue(&Caller::Account, &queue, QueueMetadata::new())
        .await
        .unwrap();

    Harness {
        service,
        clock,
        queue,
    }
}

impl Harness {
    async fn send(&self, content: &str) -> EnqueuedMessage {
        self.service
            .send_message(
                &Caller::Account,
                &self.queue,
                content.to_string(),
                SendOptions::new(),
            )
            .await
            .unwrap()
    }

    async fn receive(&self, options: ReceiveOptions) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.service
            .receive_messages(&Caller::Account, &self.queue, options)
            .await
    }

    async fn peek_all(&self) -> Vec<PeekedMessage> {
        self.service
            .peek_messages(&Caller::Account, &self.queue, Some(32))
            .await
            .unwrap()
    }
}

// ============================================================================
// Queue Management
// ============================================================================

mod queues {
    use super::*;

    #[tokio::test]
    async fn test_create_queue_reports_created() {
        let service = InMemoryQueueService::default();
        let name = QueueName::new("fresh".to_string()).unwrap();

        let response = service
            .create_queue(&Caller::Account, &name, QueueMetadata::new())
            .await
            .unwrap();
        assert!(response.created);

        let err = service
            .create_queue(&Caller::Account, &name, QueueMetadata::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_delete_missing_queue_fails() {
        let service = InMemoryQueueService::default();
        let name = QueueName::new("missing".to_string()).unwrap();

        let err = service
            .delete_queue(&Caller::Account, &name)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_operations_on_missing_queue_fail() {
        let service = InMemoryQueueService::default();
        let name = QueueName::new("missing".to_string()).unwrap();

        let err = service
            .send_message(&Caller::Account, &name, "x".to_string(), SendOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = service
            .peek_messages(&Caller::Account, &name, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_properties_and_metadata() {
        let h = harness().await;
        h.send("a").await;
        h.send("b").await;

        let metadata = QueueMetadata::from_pairs([("Purpose", "testing")]).unwrap();
        assert_ok!(
            h.service
                .set_metadata(&Caller::Account, &h.queue, metadata)
                .await
        );

        let properties = h
            .service
            .get_queue_properties(&Caller::Account, &h.queue)
            .await
            .unwrap();
        assert_eq!(properties.approximate_message_count, 2);
        assert_eq!(properties.metadata.get("purpose"), Some("testing"));
        assert_eq!(properties.created_at, h.clock.now());
    }

    #[tokio::test]
    async fn test_list_queues() {
        let h = harness().await;
        let other = QueueName::new("work-archive".to_string()).unwrap();
        h.service
            .create_queue(&Caller::Account, &other, QueueMetadata::new())
            .await
            .unwrap();

        let page = h
            .service
            .list_queues(
                &Caller::Account,
                ListQueuesOptions::new().with_prefix("work-"),
            )
            .await
            .unwrap();
        let names: Vec<&str> = page.items.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["work-archive", "work-items"]);
    }
}

// ============================================================================
// Message Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_send_receive_delete_scenario() {
        let h = harness().await;
        h.send("a").await;
        h.send("b").await;

        let first = h
            .receive(ReceiveOptions::new().with_max_messages(1))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].content, "a");
        assert_eq!(first[0].dequeue_count, 1);

        assert_ok!(
            h.service
                .delete_message(
                    &Caller::Account,
                    &h.queue,
                    &first[0].id,
                    &first[0].lease_token
                )
                .await
        );

        let second = h
            .receive(ReceiveOptions::new().with_max_messages(1))
            .await
            .unwrap();
        assert_eq!(second[0].content, "b");
    }

    #[tokio::test]
    async fn test_send_result_has_no_lease() {
        let h = harness().await;
        let sent = h.send("hello").await;

        assert_eq!(sent.content, "hello");
        assert_eq!(sent.inserted_at, h.clock.now());
        assert_eq!(sent.next_visible_at, sent.inserted_at);
        assert_eq!(
            sent.expires_at,
            sent.inserted_at.saturating_add(Duration::days(7))
        );
    }

    #[tokio::test]
    async fn test_send_with_infinite_ttl_and_delay() {
        let h = harness().await;

        let sent = h
            .service
            .send_message(
                &Caller::Account,
                &h.queue,
                "later".to_string(),
                SendOptions::new()
                    .with_time_to_live(TimeToLive::Infinite)
                    .with_visibility_delay(Duration::seconds(30)),
            )
            .await
            .unwrap();
        assert_eq!(sent.expires_at, Timestamp::max());
        assert!(h.peek_all().await.is_empty());

        h.clock.advance(Duration::seconds(30));
        assert_eq!(h.peek_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_default_visibility_timeout_applies() {
        let h = harness().await;
        h.send("a").await;

        let received = h.receive(ReceiveOptions::new()).await.unwrap();
        assert_eq!(
            received[0].next_visible_at,
            h.clock.now().saturating_add(Duration::seconds(30))
        );

        h.clock.advance(Duration::seconds(29));
        assert!(h.peek_all().await.is_empty());
        h.clock.advance(Duration::seconds(1));
        assert_eq!(h.peek_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_peek_does_not_count_as_dequeue() {
        let h = harness().await;
        h.send("a").await;

        for _ in 0..3 {
            assert_eq!(h.peek_all().await[0].dequeue_count, 0);
        }

        let received = h.receive(ReceiveOptions::new()).await.unwrap();
        assert_eq!(received[0].dequeue_count, 1);
        assert_eq!(h.peek_all().await.len(), 0);
    }

    #[tokio::test]
    async fn test_update_zero_timeout_then_receive_again() {
        let h = harness().await;
        h.send("a").await;
        let received = h.receive(ReceiveOptions::new()).await.unwrap().remove(0);

        let receipt = h
            .service
            .update_message(
                &Caller::Account,
                &h.queue,
                &received.id,
                &received.lease_token,
                Duration::zero(),
                Some("a2".to_string()),
            )
            .await
            .unwrap();
        assert_ne!(receipt.lease_token, received.lease_token);

        let again = h.receive(ReceiveOptions::new()).await.unwrap().remove(0);
        assert_eq!(again.id, received.id);
        assert_eq!(again.content, "a2");
        assert_eq!(again.dequeue_count, 2);

        let err = h
            .service
            .delete_message(&Caller::Account, &h.queue, &received.id, &receipt.lease_token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fencing);
    }

    #[tokio::test]
    async fn test_clear_messages() {
        let h = harness().await;
        h.send("a").await;
        h.send("b").await;
        h.receive(ReceiveOptions::new().with_max_messages(1))
            .await
            .unwrap();

        assert_ok!(h.service.clear_messages(&Caller::Account, &h.queue).await);

        h.clock.advance(Duration::days(1));
        assert!(h.peek_all().await.is_empty());
    }
}

// ============================================================================
// Paged Receive
// ============================================================================

mod paging {
    use super::*;

    #[tokio::test]
    async fn test_paged_receive_then_default_receive() {
        let h = harness().await;
        for i in 0..12 {
            h.send(&format!("m{}", i)).await;
        }

        let received = h
            .receive(
                ReceiveOptions::new()
                    .with_messages_per_page(3)
                    .with_max_messages(10),
            )
            .await
            .unwrap();
        assert_eq!(received.len(), 10);
        let ids: HashSet<&MessageId> = received.iter().map(|m| &m.id).collect();
        assert_eq!(ids.len(), 10);

        let rest = h.receive(ReceiveOptions::new()).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|m| !ids.contains(&m.id)));
    }

    #[tokio::test]
    async fn test_page_larger_than_max_is_rejected_without_leasing() {
        let h = harness().await;
        for i in 0..5 {
            h.send(&format!("m{}", i)).await;
        }

        let err = h
            .receive(
                ReceiveOptions::new()
                    .with_messages_per_page(5)
                    .with_max_messages(2),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let peeked = h.peek_all().await;
        assert_eq!(peeked.len(), 5);
        assert!(peeked.iter().all(|m| m.dequeue_count == 0));
    }

    #[tokio::test]
    async fn test_invalid_receive_arguments() {
        let h = harness().await;
        h.send("a").await;

        assert_err!(h.receive(ReceiveOptions::new().with_max_messages(0)).await);
        assert_err!(h.receive(ReceiveOptions::new().with_messages_per_page(33)).await);
        assert_err!(
            h.receive(ReceiveOptions::new().with_visibility_timeout(Duration::days(8)))
                .await
        );
        assert_err!(
            h.receive(ReceiveOptions::new().with_visibility_timeout(Duration::seconds(-1)))
                .await
        );

        assert_eq!(h.peek_all().await[0].dequeue_count, 0);
    }

    #[tokio::test]
    async fn test_large_max_spans_multiple_batches() {
        let h = harness().await;
        for i in 0..40 {
            h.send(&format!("m{}", i)).await;
        }

        let received = h
            .receive(ReceiveOptions::new().with_max_messages(40))
            .await
            .unwrap();
        assert_eq!(received.len(), 40);
        assert_eq!(received[39].content, "m39");
    }

    #[tokio::test]
    async fn test_receive_pages_is_lazy() {
        let h = harness().await;
        for i in 0..6 {
            h.send(&format!("m{}", i)).await;
        }

        let mut pages = h
            .service
            .receive_pages(
                &Caller::Account,
                &h.queue,
                &ReceiveOptions::new()
                    .with_messages_per_page(2)
                    .with_max_messages(6),
            )
            .unwrap();

        let first = pages.next().unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(h.peek_all().await.len(), 4);

        let remaining: usize = pages.map(|page| page.unwrap().len()).sum();
        assert_eq!(remaining, 4);
    }

    #[tokio::test]
    async fn test_default_receive_with_zero_timeout_terminates() {
        let h = harness().await;
        h.send("a").await;
        h.send("b").await;

        let received = h
            .receive(ReceiveOptions::new().with_visibility_timeout(Duration::zero()))
            .await
            .unwrap();
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn test_receive_pages_reclaims_message_released_between_pages() {
        let h = harness().await;
        h.send("message1").await;
        h.send("message2").await;

        let mut pages = h
            .service
            .receive_pages(&Caller::Account, &h.queue, &ReceiveOptions::new())
            .unwrap();

        let first = assert_ok!(pages.next().unwrap());
        assert_eq!(first.len(), 1);
        let leased = &first[0];
        assert_eq!(leased.content, "message1");

        h.service
            .update_message(
                &Caller::Account,
                &h.queue,
                &leased.id,
                &leased.lease_token,
                Duration::zero(),
                None,
            )
            .await
            .unwrap();

        let second = assert_ok!(pages.next().unwrap());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, leased.id);
        assert_eq!(second[0].content, "message1");
        assert_eq!(second[0].dequeue_count, 2);

        let third = assert_ok!(pages.next().unwrap());
        assert_eq!(third[0].content, "message2");
        assert!(pages.next().is_none());
    }

    #[tokio::test]
    async fn test_unbounded_receive_pages_stop_on_empty_queue() {
        let h = harness().await;
        h.send("a").await;

        let pages = h
            .service
            .receive_pages(
                &Caller::Account,
                &h.queue,
                &ReceiveOptions::new().with_messages_per_page(4),
            )
            .unwrap();

        let counts: Vec<usize> = pages.map(|page| page.unwrap().len()).collect();
        assert_eq!(counts, vec![1]);
    }

    #[tokio::test]
    async fn test_browse_messages_pages_by_insertion_order() {
        let h = harness().await;
        for i in 0..5 {
            h.send(&format!("m{}", i)).await;
        }

        let first = h
            .service
            .browse_messages(
                &Caller::Account,
                &h.queue,
                BrowseOptions::new().with_page_size(3),
            )
            .await
            .unwrap();
        assert_eq!(first.items.len(), 3);

        let second = h
            .service
            .browse_messages(
                &Caller::Account,
                &h.queue,
                BrowseOptions::new()
                    .with_page_size(3)
                    .with_continuation(first.continuation.unwrap()),
            )
            .await
            .unwrap();
        let contents: Vec<&str> = second.items.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
        assert!(second.continuation.is_none());
    }
}

// ============================================================================
// Access Policies
// ============================================================================

mod access {
    use super::*;

    fn reader_policies(now: Timestamp) -> AccessPolicies {
        let mut policies = AccessPolicies::new();
        policies.insert(
            "readers".to_string(),
            AccessPolicy::new()
                .with_permission(QueuePermissions::READ)
                .with_start(now)
                .with_expiry(now.saturating_add(Duration::hours(1))),
        );
        policies
    }

    #[tokio::test]
    async fn test_sixteen_policies_rejected_and_previous_kept() {
        let h = harness().await;
        let now = h.clock.now();
        h.service
            .set_access_policy(&Caller::Account, &h.queue, reader_policies(now))
            .await
            .unwrap();
        let before = h
            .service
            .get_access_policy(&Caller::Account, &h.queue)
            .await
            .unwrap();

        let too_many: AccessPolicies = (0..16)
            .map(|i| (format!("id-{:02}", i), AccessPolicy::default()))
            .collect();
        let err = h
            .service
            .set_access_policy(&Caller::Account, &h.queue, too_many)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let after = h
            .service
            .get_access_policy(&Caller::Account, &h.queue)
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_delegated_caller_within_policy() {
        let h = harness().await;
        h.send("a").await;
        h.service
            .set_access_policy(&Caller::Account, &h.queue, reader_policies(h.clock.now()))
            .await
            .unwrap();
        let reader = Caller::Delegated(DelegatedAccess::new("readers"));

        let peeked = h
            .service
            .peek_messages(&reader, &h.queue, None)
            .await
            .unwrap();
        assert_eq!(peeked.len(), 1);

        let err = h
            .service
            .receive_messages(&reader, &h.queue, ReceiveOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = h
            .service
            .send_message(&reader, &h.queue, "x".to_string(), SendOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        // Nothing was leased or added by the rejected calls
        let peeked = h.peek_all().await;
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].dequeue_count, 0);
    }

    #[tokio::test]
    async fn test_delegated_caller_outside_window() {
        let h = harness().await;
        h.send("a").await;
        h.service
            .set_access_policy(&Caller::Account, &h.queue, reader_policies(h.clock.now()))
            .await
            .unwrap();
        let reader = Caller::Delegated(DelegatedAccess::new("readers"));

        h.clock.advance(Duration::hours(2));
        let err = h
            .service
            .peek_messages(&reader, &h.queue, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn test_delegated_caller_cannot_administer() {
        let h = harness().await;
        let reader = Caller::Delegated(DelegatedAccess::new("readers"));

        let err = h
            .service
            .get_access_policy(&reader, &h.queue)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = h
            .service
            .delete_queue(&reader, &h.queue)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(h.service.catalog().get(&h.queue).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_policy_identifier() {
        let h = harness().await;
        let stranger = Caller::Delegated(DelegatedAccess::new("nobody"));

        let err = h
            .service
            .peek_messages(&stranger, &h.queue, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn test_delegated_caller_denied_on_missing_queue() {
        let h = harness().await;
        let reader = Caller::Delegated(DelegatedAccess::new("readers"));
        let missing = QueueName::new("missing".to_string()).unwrap();

        let err = h
            .service
            .peek_messages(&reader, &missing, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = h
            .service
            .get_queue_properties(&reader, &missing)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = h
            .service
            .get_queue_properties(&Caller::Account, &missing)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
