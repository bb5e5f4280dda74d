//! Remote messaging system seams
//!
//! The driver never talks to Pulsar directly. It goes through these traits so the
//! provisioning and rebind logic can run against the real backends
//! ([`admin::HttpAdminClient`], [`pulsar_client::PulsarMessagingClient`]) or the in-memory
//! mocks in [`crate::testing`].

use crate::config::{ClientSection, DriverConfig, ProducerSection};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod admin;
pub mod oauth2;
pub mod pulsar_client;

pub use admin::HttpAdminClient;
pub use pulsar_client::{PulsarConnector, PulsarMessagingClient};

/// Admin plane errors
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Admin request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Admin request failed")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Admin client is closed")]
    Closed,
}

impl AdminError {
    /// "Already exists" responses are benign when many workers provision at once
    pub fn is_conflict(&self) -> bool {
        matches!(self, AdminError::Conflict(_))
    }
}

/// Data plane errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection failed")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Producer operation failed")]
    Producer(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Consumer operation failed")]
    Consumer(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Client is closed")]
    Closed,
}

/// Tenant registration payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInfo {
    pub admin_roles: Vec<String>,
    pub allowed_clusters: Vec<String>,
}

/// Bookkeeper replication settings applied to the benchmark namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistencePolicies {
    #[serde(rename = "bookkeeperEnsemble")]
    pub ensemble_size: u32,
    #[serde(rename = "bookkeeperWriteQuorum")]
    pub write_quorum: u32,
    #[serde(rename = "bookkeeperAckQuorum")]
    pub ack_quorum: u32,
    #[serde(rename = "managedLedgerMaxMarkDeleteRate")]
    pub max_mark_delete_rate: f64,
}

/// What the broker does once a backlog quota is exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    ProducerRequestHold,
    ProducerException,
    ConsumerBacklogEviction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogQuota {
    pub limit_size: i64,
    pub policy: RetentionPolicy,
}

impl BacklogQuota {
    /// Unbounded backlog; producers are rejected rather than messages evicted
    pub fn unbounded() -> Self {
        Self {
            limit_size: i64::MAX,
            policy: RetentionPolicy::ProducerException,
        }
    }
}

/// Immutable producer settings built once at initialization and reused for every producer
///
/// The pending queue bound is client-wide and applied when the client connects.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerTemplate {
    pub batching_enabled: bool,
    pub batching_max_publish_delay: Duration,
    pub block_if_queue_full: bool,
}

impl From<&ProducerSection> for ProducerTemplate {
    fn from(section: &ProducerSection) -> Self {
        Self {
            batching_enabled: section.batching_enabled,
            batching_max_publish_delay: Duration::from_millis(
                section.batching_max_publish_delay_ms,
            ),
            block_if_queue_full: section.block_if_queue_full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    Exclusive,
    Shared,
    Failover,
    KeyShared,
}

/// Message delivery hook invoked for every received message
pub trait ConsumerCallback: Send + Sync {
    fn message_received(&self, payload: &[u8], publish_timestamp_ms: u64, subscription: &str);
}

/// Everything needed to (re)create a consumer for one subscription name
#[derive(Clone)]
pub struct ConsumerDescriptor {
    pub topic: String,
    pub subscription: String,
    pub subscription_type: SubscriptionType,
    pub callback: Arc<dyn ConsumerCallback>,
}

impl ConsumerDescriptor {
    pub fn shared(topic: &str, subscription: &str, callback: Arc<dyn ConsumerCallback>) -> Self {
        Self {
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            subscription_type: SubscriptionType::Shared,
            callback,
        }
    }

    /// Same subscription and callback, bound to another topic
    pub fn retarget(&self, topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for ConsumerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerDescriptor")
            .field("topic", &self.topic)
            .field("subscription", &self.subscription)
            .field("subscription_type", &self.subscription_type)
            .finish_non_exhaustive()
    }
}

/// Administrative operations against the control plane
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<String>, AdminError>;

    async fn create_tenant(&self, tenant: &str, info: &TenantInfo) -> Result<(), AdminError>;

    async fn create_namespace(&self, namespace: &str) -> Result<(), AdminError>;

    async fn set_persistence(
        &self,
        namespace: &str,
        policies: &PersistencePolicies,
    ) -> Result<(), AdminError>;

    async fn set_backlog_quota(
        &self,
        namespace: &str,
        quota: &BacklogQuota,
    ) -> Result<(), AdminError>;

    async fn set_deduplication(&self, namespace: &str, enabled: bool) -> Result<(), AdminError>;

    async fn create_partitioned_topic(&self, topic: &str, partitions: u32)
        -> Result<(), AdminError>;

    async fn close(&self) -> Result<(), AdminError>;
}

/// Data plane operations: producers and subscriptions
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn create_producer(
        &self,
        topic: &str,
        template: &ProducerTemplate,
    ) -> Result<Box<dyn ProducerLink>, ClientError>;

    /// Subscribe and start delivering to the descriptor's callback
    async fn subscribe(
        &self,
        descriptor: ConsumerDescriptor,
    ) -> Result<Arc<dyn ConsumerLink>, ClientError>;

    async fn close(&self) -> Result<(), ClientError>;
}

/// A live client-side producer
#[async_trait]
pub trait ProducerLink: Send + Sync {
    fn topic(&self) -> &str;

    /// Resolves once the broker acknowledged the message
    async fn send(&self, key: Option<&str>, payload: &[u8]) -> Result<(), ClientError>;

    async fn close(&self) -> Result<(), ClientError>;
}

/// A live client-side consumer
#[async_trait]
pub trait ConsumerLink: Send + Sync {
    fn topic(&self) -> &str;

    fn subscription(&self) -> &str;

    /// Remove the server-side subscription and stop delivery
    async fn unsubscribe(&self) -> Result<(), ClientError>;

    async fn close(&self) -> Result<(), ClientError>;
}

/// Builds the two remote clients during driver initialization
#[async_trait]
pub trait Connector: Send + Sync {
    /// Data plane client; needs the producer section for the outbound queue bound
    async fn connect_client(
        &self,
        config: &DriverConfig,
    ) -> Result<Arc<dyn MessagingClient>, ClientError>;

    async fn connect_admin(&self, config: &ClientSection)
        -> Result<Arc<dyn AdminClient>, ClientError>;
}
