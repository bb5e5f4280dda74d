//! Benchmark driver core
//!
//! The harness programs against [`BenchmarkDriver`]: one `initialize`, then any number
//! of concurrent topic/producer/consumer/rebind calls, then one `close`.

use crate::config::DriverConfig;
use crate::error::DriverResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod handles;
pub mod provisioning;
pub mod pulsar_driver;
pub mod registry;

pub use crate::client::ConsumerCallback;
pub use handles::{ConsumerHandle, ProducerHandle};
pub use provisioning::{provision, NamespaceState, Provisioned};
pub use pulsar_driver::PulsarBenchmarkDriver;
pub use registry::{ConsumerRegistry, SubscriptionTimings};

/// Receives the latency samples the driver measures itself
pub trait StatsSink: Send + Sync {
    fn record_subscription_change(&self, subscription: &str, millis: f64);
}

/// Discards every sample
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatsSink;

impl StatsSink for NoopStatsSink {
    fn record_subscription_change(&self, _subscription: &str, _millis: f64) {}
}

/// Messaging-system-neutral driver interface used by the benchmark harness
#[async_trait]
pub trait BenchmarkDriver: Send + Sync {
    /// Connect both clients and provision the tenant/namespace. Called exactly once.
    async fn initialize(
        &mut self,
        config: DriverConfig,
        stats: Arc<dyn StatsSink>,
    ) -> DriverResult<()>;

    /// Prefix the harness prepends to its topic names
    fn topic_name_prefix(&self) -> DriverResult<String>;

    async fn create_topic(&self, topic: &str, partitions: u32) -> DriverResult<()>;

    async fn create_producer(&self, topic: &str) -> DriverResult<ProducerHandle>;

    async fn create_consumer(
        &self,
        topic: &str,
        subscription: &str,
        callback: Arc<dyn ConsumerCallback>,
    ) -> DriverResult<ConsumerHandle>;

    /// Move the handle's subscription to `topic` in the background.
    ///
    /// Never fails from the caller's point of view; await the returned handle to know
    /// when the attempt is over.
    fn subscribe_consumer_to_topic(&self, consumer: &ConsumerHandle, topic: &str)
        -> JoinHandle<()>;

    /// Mean rebind time in milliseconds for the handle's subscription, `0.0` if none
    fn subscription_change_time(&self, consumer: &ConsumerHandle) -> f64;

    async fn close(&self) -> DriverResult<()>;
}
