//! Topic, producer and consumer creation tests
//!
//! These operations propagate failures to the caller unchanged and must stay safe
//! under many concurrent callers.


use pulsar_bench_driver::client::{AdminError, ClientError};
use pulsar_bench_driver::driver::BenchmarkDriver;
use pulsar_bench_driver::error::DriverError;
use pulsar_bench_driver::testing::mocks::{AdminStep, MockConnector, RecordingCallback};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_single_partition_topic_skips_admin() {
    let connector = MockConnector::new();
    let admin = connector.admin.clone();
    let (driver, _) = test_helpers::connected_driver(connector).await;
    // Any admin call would fail from here on
    admin.fail_on(AdminStep::CreatePartitionedTopic, 500).await;
    let calls_before = admin.get_calls().await.len();

    driver
        .create_topic("persistent://bench-tenant/ns/topic-0", 1)
        .await
        .unwrap();

    assert_eq!(admin.get_calls().await.len(), calls_before);
}

#[tokio::test]
async fn test_partitioned_topic_created() {
    let connector = MockConnector::new();
    let admin = connector.admin.clone();
    let (driver, _) = test_helpers::connected_driver(connector).await;

    driver
        .create_topic("persistent://bench-tenant/ns/topic-0", 16)
        .await
        .unwrap();

    assert_eq!(
        admin.get_partitioned_topics().await,
        vec![("persistent://bench-tenant/ns/topic-0".to_string(), 16)]
    );
}

#[tokio::test]
async fn test_existing_topic_conflict_propagates() {
    let (driver, _) = test_helpers::connected_driver(MockConnector::new()).await;
    let topic = "persistent://bench-tenant/ns/topic-0";
    driver.create_topic(topic, 4).await.unwrap();

    let result = driver.create_topic(topic, 4).await;

    assert!(matches!(
        result,
        Err(DriverError::Admin(AdminError::Conflict(_)))
    ));
}

#[tokio::test]
async fn test_producer_sends_through_handle() {
    let connector = MockConnector::new();
    let client = connector.client.clone();
    let (driver, _) = test_helpers::connected_driver(connector).await;

    let producer = driver.create_producer("topic-0").await.unwrap();
    producer.send(Some("key-1"), b"payload").await.unwrap();
    producer.send(None, b"more").await.unwrap();
    producer.close().await.unwrap();

    assert_eq!(producer.topic(), "topic-0");
    let sent = client.get_sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].key.as_deref(), Some("key-1"));
    assert_eq!(sent[0].payload, b"payload");
    assert!(sent[1].key.is_none());
    assert!(matches!(
        producer.send(None, b"late").await,
        Err(ClientError::Closed)
    ));
}

#[tokio::test]
async fn test_producer_failure_propagates() {
    let connector = MockConnector::new();
    connector.client.fail_producer.store(true, Ordering::SeqCst);
    let (driver, _) = test_helpers::connected_driver(connector).await;

    let result = driver.create_producer("topic-0").await;

    assert!(matches!(
        result,
        Err(DriverError::Client(ClientError::Producer(_)))
    ));
}

#[tokio::test]
async fn test_consumer_failure_propagates() {
    let connector = MockConnector::new();
    connector.client.fail_subscribe.store(true, Ordering::SeqCst);
    let (driver, _) = test_helpers::connected_driver(connector).await;

    let result = driver
        .create_consumer("topic-0", "sub-1", Arc::new(RecordingCallback::new()))
        .await;

    assert!(matches!(
        result,
        Err(DriverError::Client(ClientError::Consumer(_)))
    ));
}

#[tokio::test]
async fn test_delivery_invokes_callback_and_acks() {
    let connector = MockConnector::new();
    let client = connector.client.clone();
    let (driver, _) = test_helpers::connected_driver(connector).await;
    let callback = Arc::new(RecordingCallback::new());

    let handle = driver
        .create_consumer("topic-0", "sub-1", callback.clone())
        .await
        .unwrap();
    client.deliver("topic-0", b"hello", 1_700_000_000_000).await;

    assert_eq!(handle.subscription_name(), "sub-1");
    let received = callback.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload, b"hello");
    assert_eq!(received[0].publish_timestamp_ms, 1_700_000_000_000);
    assert_eq!(received[0].subscription, "sub-1");
    assert_eq!(client.ack_count(), 1);
}

#[tokio::test]
async fn test_callbacks_are_per_subscription() {
    let connector = MockConnector::new();
    let client = connector.client.clone();
    let (driver, _) = test_helpers::connected_driver(connector).await;
    let first = Arc::new(RecordingCallback::new());
    let second = Arc::new(RecordingCallback::new());

    driver
        .create_consumer("topic-0", "sub-1", first.clone())
        .await
        .unwrap();
    driver
        .create_consumer("topic-0", "sub-2", second.clone())
        .await
        .unwrap();
    client.deliver("topic-0", b"m", 1).await;

    // A later consumer's callback does not replace an earlier one's
    assert_eq!(first.received().len(), 1);
    assert_eq!(first.received()[0].subscription, "sub-1");
    assert_eq!(second.received().len(), 1);
    assert_eq!(second.received()[0].subscription, "sub-2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumers_with_distinct_subscriptions() {
    let connector = MockConnector::new();
    let client = connector.client.clone();
    let (driver, _) = test_helpers::connected_driver(connector).await;
    let driver = Arc::new(driver);

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let driver = driver.clone();
            tokio::spawn(async move {
                driver
                    .create_consumer(
                        &format!("topic-{}", i % 4),
                        &format!("sub-{i}"),
                        Arc::new(RecordingCallback::new()),
                    )
                    .await
            })
        })
        .collect();

    let mut names = HashSet::new();
    for task in tasks {
        let handle = task.await.unwrap().unwrap();
        names.insert(handle.subscription_name().to_string());
    }

    assert_eq!(names.len(), 32);
    assert_eq!(driver.registered_subscriptions(), 32);
    for i in 0..32 {
        let subscription = format!("sub-{i}");
        let descriptor = driver.consumer_descriptor(&subscription).unwrap();
        assert_eq!(descriptor.topic, format!("topic-{}", i % 4));
        assert_eq!(client.live_consumers(&subscription).await.len(), 1);
    }
}

#[tokio::test]
async fn test_close_shuts_down_client_then_admin() {
    let connector = MockConnector::new();
    let client = connector.client.clone();
    let admin = connector.admin.clone();
    let (driver, _) = test_helpers::connected_driver(connector).await;

    driver.close().await.unwrap();
    driver.close().await.unwrap();

    assert!(!driver.is_connected());
    assert!(client.is_closed());
    assert!(admin.is_closed());
    let closes = client
        .get_events()
        .await
        .into_iter()
        .filter(|e| e == "close")
        .count();
    assert_eq!(closes, 1, "Second close is a no-op");
    assert!(matches!(
        driver.create_producer("topic-0").await,
        Err(DriverError::Client(ClientError::Closed))
    ));
}

#[tokio::test]
async fn test_close_retries_client_after_failed_close() {
    let connector = MockConnector::new();
    let client = connector.client.clone();
    let admin = connector.admin.clone();
    let (driver, _) = test_helpers::connected_driver(connector).await;
    client.fail_close(1);

    let first = driver.close().await;

    assert!(matches!(first, Err(DriverError::Client(_))));
    assert!(!driver.is_connected());
    assert!(!client.is_closed());
    assert!(admin.is_closed(), "Admin close is attempted despite client failure");

    driver.close().await.unwrap();
    assert!(client.is_closed());
    assert_eq!(client.close_count(), 2);

    // Fully closed now, so further calls do nothing
    driver.close().await.unwrap();
    assert_eq!(client.close_count(), 2);
}

#[tokio::test]
async fn test_topic_name_prefix_uses_namespace_and_cluster() {
    let (driver, _) = test_helpers::connected_driver(MockConnector::new()).await;

    let prefix = driver.topic_name_prefix().unwrap();

    assert!(prefix.starts_with("persistent://bench-tenant/bench-ns-"));
    assert!(prefix.ends_with("/standalone/"));
    assert_eq!(
        prefix,
        format!("persistent://{}/standalone/", driver.namespace().unwrap())
    );
}
