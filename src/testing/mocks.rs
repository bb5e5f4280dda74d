//! Mock implementations for testing
//!
//! In-memory admin and messaging clients that record every call, so driver behavior
//! (provisioning retries, rebind ordering, delivery) can be asserted without a broker.
//! Clones share state: a test keeps one clone for inspection and hands another to
//! [`MockConnector`].

use crate::client::{
    AdminClient, AdminError, BacklogQuota, ClientError, Connector, ConsumerCallback,
    ConsumerDescriptor, ConsumerLink, MessagingClient, PersistencePolicies, ProducerLink,
    ProducerTemplate, TenantInfo,
};
use crate::config::{ClientSection, DriverConfig};
use crate::driver::StatsSink;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Admin operations a failure can be scripted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminStep {
    ListTenants,
    CreateTenant,
    CreateNamespace,
    SetPersistence,
    SetBacklogQuota,
    SetDeduplication,
    CreatePartitionedTopic,
}

#[derive(Debug, Clone)]
enum ScriptedFailure {
    Conflict,
    Status(u16),
}

/// Mock admin client backed by in-memory tenants, namespaces and topics
#[derive(Debug, Default, Clone)]
pub struct MockAdminClient {
    pub tenants: Arc<Mutex<Vec<String>>>,
    pub namespaces: Arc<Mutex<Vec<String>>>,
    pub partitioned_topics: Arc<Mutex<Vec<(String, u32)>>>,
    pub persistence: Arc<Mutex<Vec<(String, PersistencePolicies)>>>,
    pub backlog_quotas: Arc<Mutex<Vec<(String, BacklogQuota)>>>,
    pub deduplication: Arc<Mutex<Vec<(String, bool)>>>,
    /// Every call in order, e.g. `create_namespace:tenant/ns-abc`
    pub calls: Arc<Mutex<Vec<String>>>,
    pub list_tenants_calls: Arc<AtomicU32>,
    pub closed: Arc<AtomicBool>,
    /// Report no tenants from `list_tenants` even when some exist
    pub stale_tenant_listing: bool,
    failures: Arc<Mutex<HashMap<AdminStep, VecDeque<ScriptedFailure>>>>,
}

impl MockAdminClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing never sees existing tenants, so concurrent creators race into a conflict
    pub fn with_stale_tenant_listing() -> Self {
        Self {
            stale_tenant_listing: true,
            ..Default::default()
        }
    }

    /// Make the next `times` calls of `step` fail with a conflict
    pub async fn conflict_on(&self, step: AdminStep, times: usize) {
        let mut failures = self.failures.lock().await;
        let queue = failures.entry(step).or_default();
        queue.extend(std::iter::repeat(ScriptedFailure::Conflict).take(times));
    }

    /// Make the next call of `step` fail with the given HTTP status
    pub async fn fail_on(&self, step: AdminStep, status: u16) {
        self.failures
            .lock()
            .await
            .entry(step)
            .or_default()
            .push_back(ScriptedFailure::Status(status));
    }

    pub fn list_tenants_count(&self) -> u32 {
        self.list_tenants_calls.load(Ordering::SeqCst)
    }

    pub async fn get_calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn get_namespaces(&self) -> Vec<String> {
        self.namespaces.lock().await.clone()
    }

    pub async fn get_partitioned_topics(&self) -> Vec<(String, u32)> {
        self.partitioned_topics.lock().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn enter(&self, step: AdminStep, call: String) -> Result<(), AdminError> {
        if self.is_closed() {
            return Err(AdminError::Closed);
        }
        self.calls.lock().await.push(call.clone());

        let scripted = self
            .failures
            .lock()
            .await
            .get_mut(&step)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(ScriptedFailure::Conflict) => Err(AdminError::Conflict(call)),
            Some(ScriptedFailure::Status(status)) => Err(AdminError::Status {
                status,
                message: call,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AdminClient for MockAdminClient {
    async fn list_tenants(&self) -> Result<Vec<String>, AdminError> {
        self.list_tenants_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(AdminStep::ListTenants, "list_tenants".to_string())
            .await?;
        if self.stale_tenant_listing {
            return Ok(Vec::new());
        }
        Ok(self.tenants.lock().await.clone())
    }

    async fn create_tenant(&self, tenant: &str, _info: &TenantInfo) -> Result<(), AdminError> {
        self.enter(AdminStep::CreateTenant, format!("create_tenant:{tenant}"))
            .await?;
        let mut tenants = self.tenants.lock().await;
        if tenants.iter().any(|t| t == tenant) {
            return Err(AdminError::Conflict(format!("tenant {tenant} already exists")));
        }
        tenants.push(tenant.to_string());
        Ok(())
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), AdminError> {
        self.enter(
            AdminStep::CreateNamespace,
            format!("create_namespace:{namespace}"),
        )
        .await?;
        let mut namespaces = self.namespaces.lock().await;
        if namespaces.iter().any(|ns| ns == namespace) {
            return Err(AdminError::Conflict(format!(
                "namespace {namespace} already exists"
            )));
        }
        namespaces.push(namespace.to_string());
        Ok(())
    }

    async fn set_persistence(
        &self,
        namespace: &str,
        policies: &PersistencePolicies,
    ) -> Result<(), AdminError> {
        self.enter(
            AdminStep::SetPersistence,
            format!("set_persistence:{namespace}"),
        )
        .await?;
        self.persistence
            .lock()
            .await
            .push((namespace.to_string(), policies.clone()));
        Ok(())
    }

    async fn set_backlog_quota(
        &self,
        namespace: &str,
        quota: &BacklogQuota,
    ) -> Result<(), AdminError> {
        self.enter(
            AdminStep::SetBacklogQuota,
            format!("set_backlog_quota:{namespace}"),
        )
        .await?;
        self.backlog_quotas
            .lock()
            .await
            .push((namespace.to_string(), quota.clone()));
        Ok(())
    }

    async fn set_deduplication(&self, namespace: &str, enabled: bool) -> Result<(), AdminError> {
        self.enter(
            AdminStep::SetDeduplication,
            format!("set_deduplication:{namespace}"),
        )
        .await?;
        self.deduplication
            .lock()
            .await
            .push((namespace.to_string(), enabled));
        Ok(())
    }

    async fn create_partitioned_topic(
        &self,
        topic: &str,
        partitions: u32,
    ) -> Result<(), AdminError> {
        self.enter(
            AdminStep::CreatePartitionedTopic,
            format!("create_partitioned_topic:{topic}"),
        )
        .await?;
        let mut topics = self.partitioned_topics.lock().await;
        if topics.iter().any(|(name, _)| name == topic) {
            return Err(AdminError::Conflict(format!("topic {topic} already exists")));
        }
        topics.push((topic.to_string(), partitions));
        Ok(())
    }

    async fn close(&self) -> Result<(), AdminError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A message handed to a mock producer
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Mock messaging client with an ordered event log and manual message delivery
#[derive(Debug, Default, Clone)]
pub struct MockMessagingClient {
    /// Data plane events in order: `subscribe:<sub>:<topic>`, `unsubscribe:<sub>:<topic>`,
    /// `close_consumer:<sub>:<topic>`, `create_producer:<topic>`, `close`
    pub events: Arc<Mutex<Vec<String>>>,
    pub sent: Arc<Mutex<Vec<SentMessage>>>,
    pub acks: Arc<AtomicU64>,
    pub closed: Arc<AtomicBool>,
    pub fail_subscribe: Arc<AtomicBool>,
    pub fail_unsubscribe: Arc<AtomicBool>,
    pub fail_producer: Arc<AtomicBool>,
    /// Number of upcoming `close` calls that fail
    pub close_failures: Arc<AtomicU32>,
    pub close_calls: Arc<AtomicU32>,
    consumers: Arc<Mutex<Vec<Arc<MockConsumerLink>>>>,
}

impl MockMessagingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_events(&self) -> Vec<String> {
        self.events.lock().await.clone()
    }

    pub async fn get_sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub fn ack_count(&self) -> u64 {
        self.acks.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make the next `times` calls to `close` fail
    pub fn fail_close(&self, times: u32) {
        self.close_failures.store(times, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Live consumers bound to a subscription name
    pub async fn live_consumers(&self, subscription: &str) -> Vec<String> {
        self.consumers
            .lock()
            .await
            .iter()
            .filter(|c| c.is_active() && c.descriptor.subscription == subscription)
            .map(|c| c.descriptor.topic.clone())
            .collect()
    }

    /// Deliver one message published on `topic` to every subscription bound to it
    ///
    /// Each subscription sees the message once, on its first live consumer. The
    /// consumer acknowledges after the callback returns. Returns the delivery count.
    pub async fn deliver(&self, topic: &str, payload: &[u8], publish_timestamp_ms: u64) -> usize {
        let consumers = self.consumers.lock().await.clone();
        let mut seen: Vec<&str> = Vec::new();
        for consumer in consumers
            .iter()
            .filter(|c| c.is_active() && c.descriptor.topic == topic)
        {
            let subscription = consumer.descriptor.subscription.as_str();
            if seen.contains(&subscription) {
                continue;
            }
            seen.push(subscription);
            consumer
                .descriptor
                .callback
                .message_received(payload, publish_timestamp_ms, subscription);
            self.acks.fetch_add(1, Ordering::SeqCst);
        }
        seen.len()
    }

    fn check_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessagingClient for MockMessagingClient {
    async fn create_producer(
        &self,
        topic: &str,
        _template: &ProducerTemplate,
    ) -> Result<Box<dyn ProducerLink>, ClientError> {
        self.check_open()?;
        if self.fail_producer.load(Ordering::SeqCst) {
            return Err(ClientError::Producer("Mock producer failure".into()));
        }
        self.events
            .lock()
            .await
            .push(format!("create_producer:{topic}"));
        Ok(Box::new(MockProducerLink {
            topic: topic.to_string(),
            sent: self.sent.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn subscribe(
        &self,
        descriptor: ConsumerDescriptor,
    ) -> Result<Arc<dyn ConsumerLink>, ClientError> {
        self.check_open()?;
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ClientError::Consumer("Mock subscribe failure".into()));
        }
        self.events.lock().await.push(format!(
            "subscribe:{}:{}",
            descriptor.subscription, descriptor.topic
        ));

        let link = Arc::new(MockConsumerLink {
            descriptor,
            active: AtomicBool::new(true),
            events: self.events.clone(),
            fail_unsubscribe: self.fail_unsubscribe.clone(),
        });
        self.consumers.lock().await.push(link.clone());
        Ok(link)
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .close_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::Connection("Mock close failed".into()));
        }

        self.closed.store(true, Ordering::SeqCst);
        self.events.lock().await.push("close".to_string());
        for consumer in self.consumers.lock().await.iter() {
            consumer.active.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Producer created by [`MockMessagingClient`]
#[derive(Debug)]
pub struct MockProducerLink {
    topic: String,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    closed: AtomicBool,
}

#[async_trait]
impl ProducerLink for MockProducerLink {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, key: Option<&str>, payload: &[u8]) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        self.sent.lock().await.push(SentMessage {
            topic: self.topic.clone(),
            key: key.map(str::to_string),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Consumer created by [`MockMessagingClient`]
#[derive(Debug)]
pub struct MockConsumerLink {
    descriptor: ConsumerDescriptor,
    active: AtomicBool,
    events: Arc<Mutex<Vec<String>>>,
    fail_unsubscribe: Arc<AtomicBool>,
}

impl MockConsumerLink {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumerLink for MockConsumerLink {
    fn topic(&self) -> &str {
        &self.descriptor.topic
    }

    fn subscription(&self) -> &str {
        &self.descriptor.subscription
    }

    async fn unsubscribe(&self) -> Result<(), ClientError> {
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(ClientError::Consumer("Mock unsubscribe failure".into()));
        }
        self.active.store(false, Ordering::SeqCst);
        self.events.lock().await.push(format!(
            "unsubscribe:{}:{}",
            self.descriptor.subscription, self.descriptor.topic
        ));
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.active.store(false, Ordering::SeqCst);
        self.events.lock().await.push(format!(
            "close_consumer:{}:{}",
            self.descriptor.subscription, self.descriptor.topic
        ));
        Ok(())
    }
}

/// Connector handing out shared mock clients
#[derive(Debug, Default, Clone)]
pub struct MockConnector {
    pub admin: MockAdminClient,
    pub client: MockMessagingClient,
    pub fail_client: bool,
    pub fail_admin: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector sharing an admin client, e.g. between simulated workers
    pub fn with_admin(admin: MockAdminClient) -> Self {
        Self {
            admin,
            ..Default::default()
        }
    }

    pub fn with_client_failure() -> Self {
        Self {
            fail_client: true,
            ..Default::default()
        }
    }

    pub fn with_admin_failure() -> Self {
        Self {
            fail_admin: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect_client(
        &self,
        _config: &DriverConfig,
    ) -> Result<Arc<dyn MessagingClient>, ClientError> {
        if self.fail_client {
            return Err(ClientError::Connection("Mock connection refused".into()));
        }
        Ok(Arc::new(self.client.clone()))
    }

    async fn connect_admin(
        &self,
        _config: &ClientSection,
    ) -> Result<Arc<dyn AdminClient>, ClientError> {
        if self.fail_admin {
            return Err(ClientError::Connection("Mock admin unreachable".into()));
        }
        Ok(Arc::new(self.admin.clone()))
    }
}

/// A message seen by [`RecordingCallback`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub payload: Vec<u8>,
    pub publish_timestamp_ms: u64,
    pub subscription: String,
}

/// Consumer callback that records every delivery
#[derive(Debug, Default)]
pub struct RecordingCallback {
    received: std::sync::Mutex<Vec<ReceivedMessage>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<ReceivedMessage> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ConsumerCallback for RecordingCallback {
    fn message_received(&self, payload: &[u8], publish_timestamp_ms: u64, subscription: &str) {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ReceivedMessage {
                payload: payload.to_vec(),
                publish_timestamp_ms,
                subscription: subscription.to_string(),
            });
    }
}

/// Stats sink that records every subscription change sample
#[derive(Debug, Default)]
pub struct RecordingStatsSink {
    samples: std::sync::Mutex<Vec<(String, f64)>>,
}

impl RecordingStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<(String, f64)> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl StatsSink for RecordingStatsSink {
    fn record_subscription_change(&self, subscription: &str, millis: f64) {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((subscription.to_string(), millis));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_conflicts_are_consumed() {
        let admin = MockAdminClient::new();
        admin.conflict_on(AdminStep::ListTenants, 2).await;

        assert!(admin.list_tenants().await.unwrap_err().is_conflict());
        assert!(admin.list_tenants().await.unwrap_err().is_conflict());
        assert!(admin.list_tenants().await.is_ok());
        assert_eq!(admin.list_tenants_count(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_tenant_conflicts() {
        let admin = MockAdminClient::new();
        let info = TenantInfo {
            admin_roles: vec![],
            allowed_clusters: vec!["standalone".to_string()],
        };
        admin.create_tenant("bench", &info).await.unwrap();
        assert!(admin
            .create_tenant("bench", &info)
            .await
            .unwrap_err()
            .is_conflict());
    }

    #[tokio::test]
    async fn test_deliver_once_per_subscription() {
        let client = MockMessagingClient::new();
        let callback = Arc::new(RecordingCallback::new());

        for _ in 0..2 {
            client
                .subscribe(ConsumerDescriptor::shared("t", "sub-1", callback.clone()))
                .await
                .unwrap();
        }
        client
            .subscribe(ConsumerDescriptor::shared("t", "sub-2", callback.clone()))
            .await
            .unwrap();

        assert_eq!(client.deliver("t", b"hello", 7).await, 2);
        assert_eq!(callback.received().len(), 2);
        assert_eq!(client.ack_count(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribed_consumer_gets_nothing() {
        let client = MockMessagingClient::new();
        let callback = Arc::new(RecordingCallback::new());
        let link = client
            .subscribe(ConsumerDescriptor::shared("t", "sub-1", callback.clone()))
            .await
            .unwrap();

        link.unsubscribe().await.unwrap();
        assert_eq!(client.deliver("t", b"late", 1).await, 0);
        assert!(client.live_consumers("sub-1").await.is_empty());
    }
}
