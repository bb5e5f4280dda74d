//! Pulsar implementation of [`BenchmarkDriver`]
//!
//! `initialize` moves the driver from "no session" to a connected [`Session`]. All later
//! operations go through that session, which is shared with background rebind tasks.

use super::handles::{ConsumerHandle, ProducerHandle};
use super::provisioning::provision;
use super::registry::{ConsumerRegistry, SubscriptionTimings};
use super::{BenchmarkDriver, StatsSink};
use crate::client::{
    AdminClient, ConsumerCallback, ConsumerDescriptor, ConsumerLink, Connector, MessagingClient,
    PersistencePolicies, ProducerTemplate, PulsarConnector,
};
use crate::config::DriverConfig;
use crate::driver_span;
use crate::error::{DriverError, DriverResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Max mark-delete rate applied together with the replication counts
const MAX_MARK_DELETE_RATE: f64 = 1.0;

/// State that exists only once the driver is connected
struct Session {
    config: DriverConfig,
    client: Arc<dyn MessagingClient>,
    admin: Arc<dyn AdminClient>,
    namespace: String,
    producer_template: ProducerTemplate,
    consumers: ConsumerRegistry,
    timings: SubscriptionTimings,
    connected: AtomicBool,
    /// Set only once both clients closed successfully
    closed: AtomicBool,
    client_closed: AtomicBool,
    admin_closed: AtomicBool,
    stats: Arc<dyn StatsSink>,
}

impl Session {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Close whichever clients are still open; both are attempted
    async fn close_clients(&self) -> DriverResult<()> {
        let mut client_result = Ok(());
        if !self.client_closed.load(Ordering::Acquire) {
            client_result = self.client.close().await;
            if client_result.is_ok() {
                self.client_closed.store(true, Ordering::Release);
            }
        }

        let mut admin_result = Ok(());
        if !self.admin_closed.load(Ordering::Acquire) {
            admin_result = self.admin.close().await;
            if admin_result.is_ok() {
                self.admin_closed.store(true, Ordering::Release);
            }
        }

        client_result?;
        admin_result?;
        Ok(())
    }

    /// Register the descriptor as the current one for its subscription, then subscribe
    async fn subscribe(&self, descriptor: ConsumerDescriptor) -> DriverResult<Arc<dyn ConsumerLink>> {
        self.consumers.register(descriptor.clone());
        let link = self.client.subscribe(descriptor).await?;
        Ok(link)
    }

    /// Unsubscribe the handle's consumer and recreate it on `topic`
    ///
    /// Returns the elapsed milliseconds, or `None` when nothing was done.
    async fn rebind(&self, consumer: &ConsumerHandle, topic: &str) -> DriverResult<Option<f64>> {
        let subscription = consumer.subscription_name();

        let Some(gate) = self.consumers.gate(subscription) else {
            debug!(subscription = %subscription, "Unknown subscription, skipping rebind");
            return Ok(None);
        };
        let _guard = gate.lock().await;

        // Shutdown may have started while we waited behind another rebind
        if !self.is_connected() {
            debug!(subscription = %subscription, "Driver disconnected, skipping rebind");
            return Ok(None);
        }
        let Some(descriptor) = self.consumers.descriptor(subscription) else {
            return Ok(None);
        };

        let started = Instant::now();
        consumer.current().await.unsubscribe().await?;
        let link = self.subscribe(descriptor.retarget(topic)).await?;
        consumer.replace(link).await;
        let millis = started.elapsed().as_secs_f64() * 1000.0;

        self.timings.record(subscription, millis);
        self.stats.record_subscription_change(subscription, millis);
        Ok(Some(millis))
    }
}

/// Benchmark driver for Apache Pulsar
pub struct PulsarBenchmarkDriver {
    connector: Arc<dyn Connector>,
    session: Option<Arc<Session>>,
}

impl Default for PulsarBenchmarkDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PulsarBenchmarkDriver {
    /// Driver that connects to a real cluster
    pub fn new() -> Self {
        Self::with_connector(Arc::new(PulsarConnector))
    }

    /// Driver that builds its clients through the given connector
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            session: None,
        }
    }

    fn session(&self) -> DriverResult<&Arc<Session>> {
        self.session.as_ref().ok_or(DriverError::NotInitialized)
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| session.is_connected())
            .unwrap_or(false)
    }

    /// Namespace provisioned during initialization
    pub fn namespace(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|session| session.namespace.as_str())
    }

    /// Registered descriptor for a subscription name, if any
    pub fn consumer_descriptor(&self, subscription: &str) -> Option<ConsumerDescriptor> {
        self.session
            .as_ref()
            .and_then(|session| session.consumers.descriptor(subscription))
    }

    /// Number of distinct subscription names registered so far
    pub fn registered_subscriptions(&self) -> usize {
        self.session
            .as_ref()
            .map(|session| session.consumers.len())
            .unwrap_or(0)
    }

    /// Snapshot of the rebind samples recorded for a subscription name
    pub fn subscription_change_samples(&self, subscription: &str) -> Vec<f64> {
        self.session
            .as_ref()
            .map(|session| session.timings.samples(subscription))
            .unwrap_or_default()
    }
}

async fn shutdown_clients(
    client: &Arc<dyn MessagingClient>,
    admin: &Arc<dyn AdminClient>,
) -> DriverResult<()> {
    let client_result = client.close().await;
    let admin_result = admin.close().await;
    client_result?;
    admin_result?;
    Ok(())
}

#[async_trait]
impl BenchmarkDriver for PulsarBenchmarkDriver {
    async fn initialize(
        &mut self,
        config: DriverConfig,
        stats: Arc<dyn StatsSink>,
    ) -> DriverResult<()> {
        if self.session.is_some() {
            return Err(DriverError::AlreadyInitialized);
        }
        config.validate()?;

        match serde_json::to_string(&config.redacted()) {
            Ok(rendered) => info!(config = %rendered, "Pulsar driver configuration"),
            Err(e) => warn!(error = %e, "Could not render driver configuration"),
        }

        let client = self
            .connector
            .connect_client(&config)
            .await
            .map_err(|e| DriverError::connection(config.client.service_url.as_str(), e))?;
        info!(service_url = %config.client.service_url, "Created Pulsar client");

        let admin = match self.connector.connect_admin(&config.client).await {
            Ok(admin) => admin,
            Err(e) => {
                if let Err(close_error) = client.close().await {
                    warn!(error = %close_error, "Failed to close client after admin connection failure");
                }
                return Err(DriverError::connection(config.client.http_url.as_str(), e));
            }
        };
        info!(http_url = %config.client.http_url, "Created Pulsar admin client");

        let producer_template = ProducerTemplate::from(&config.producer);

        let persistence = &config.client.persistence;
        let policies = PersistencePolicies {
            ensemble_size: persistence.ensemble_size,
            write_quorum: persistence.write_quorum,
            ack_quorum: persistence.ack_quorum,
            max_mark_delete_rate: MAX_MARK_DELETE_RATE,
        };

        let provisioned = match provision(admin.as_ref(), &config.client, &policies).await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                error!(error = %e, "Provisioning failed");
                if let Err(close_error) = shutdown_clients(&client, &admin).await {
                    warn!(error = %close_error, "Failed to close clients after provisioning failure");
                }
                return Err(e.into());
            }
        };

        let session = Session {
            config,
            client,
            admin,
            namespace: provisioned.namespace,
            producer_template,
            consumers: ConsumerRegistry::new(),
            timings: SubscriptionTimings::new(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            client_closed: AtomicBool::new(false),
            admin_closed: AtomicBool::new(false),
            stats,
        };
        session.connected.store(true, Ordering::Release);

        info!(
            namespace = %session.namespace,
            attempts = provisioned.attempts,
            "Pulsar benchmark driver connected"
        );
        self.session = Some(Arc::new(session));
        Ok(())
    }

    fn topic_name_prefix(&self) -> DriverResult<String> {
        let session = self.session()?;
        let client = &session.config.client;
        Ok(format!(
            "{}://{}/{}/",
            client.topic_type, session.namespace, client.cluster_name
        ))
    }

    async fn create_topic(&self, topic: &str, partitions: u32) -> DriverResult<()> {
        if partitions == 1 {
            return Ok(());
        }

        let session = self.session()?;
        session
            .admin
            .create_partitioned_topic(topic, partitions)
            .await?;
        debug!(topic = %topic, partitions, "Created partitioned topic");
        Ok(())
    }

    async fn create_producer(&self, topic: &str) -> DriverResult<ProducerHandle> {
        let session = self.session()?;
        let link = session
            .client
            .create_producer(topic, &session.producer_template)
            .await?;
        Ok(ProducerHandle::new(link))
    }

    async fn create_consumer(
        &self,
        topic: &str,
        subscription: &str,
        callback: Arc<dyn ConsumerCallback>,
    ) -> DriverResult<ConsumerHandle> {
        let session = self.session()?;
        let link = session
            .subscribe(ConsumerDescriptor::shared(topic, subscription, callback))
            .await?;
        Ok(ConsumerHandle::new(link))
    }

    fn subscribe_consumer_to_topic(
        &self,
        consumer: &ConsumerHandle,
        topic: &str,
    ) -> JoinHandle<()> {
        let session = self.session.clone();
        let consumer = consumer.clone();
        let topic = topic.to_string();
        let span = driver_span!(
            operation = "rebind",
            subscription = %consumer.subscription_name(),
            topic = %topic
        );

        tokio::spawn(
            async move {
                let Some(session) = session.filter(|session| session.is_connected()) else {
                    debug!("Driver not connected, skipping rebind");
                    return;
                };

                match session.rebind(&consumer, &topic).await {
                    Ok(Some(millis)) => debug!(millis, "Subscription moved"),
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "Could not change topic"),
                }
            }
            .instrument(span),
        )
    }

    fn subscription_change_time(&self, consumer: &ConsumerHandle) -> f64 {
        self.session
            .as_ref()
            .and_then(|session| session.timings.average(consumer.subscription_name()))
            .unwrap_or(0.0)
    }

    async fn close(&self) -> DriverResult<()> {
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        if session.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        info!("Shutting down Pulsar benchmark driver");
        session.connected.store(false, Ordering::Release);
        session.consumers.clear();
        session.timings.clear();

        if let Err(e) = session.close_clients().await {
            warn!(error = %e, "Pulsar benchmark driver did not shut down cleanly");
            return Err(e);
        }
        session.closed.store(true, Ordering::Release);
        info!("Pulsar benchmark driver successfully shut down");
        Ok(())
    }
}
