//! Pulsar data plane backed by the `pulsar` crate
//!
//! Producers and consumers are wrapped so they fit the [`ProducerLink`] and
//! [`ConsumerLink`] seams. Batching and the bounded outbound queue are the crate's own
//! (`batch_timeout`, `block_queue_if_full`, the builder's outbound channel size); each
//! consumer is owned by a delivery task that invokes the callback, acknowledges without
//! waiting on the outcome, and executes unsubscribe/close commands.

use super::{
    AdminClient, ClientError, Connector, ConsumerCallback, ConsumerDescriptor, ConsumerLink,
    HttpAdminClient, MessagingClient, ProducerLink, ProducerTemplate, SubscriptionType,
};
use crate::config::{ClientSection, Credentials, DriverConfig};
use ::pulsar::authentication::oauth2::{OAuth2Authentication, OAuth2Params};
use ::pulsar::{
    producer, Authentication, Consumer, Producer, ProducerOptions, Pulsar, SubType, TokioExecutor,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Upper bound on messages per batch when batching is enabled
const BATCH_MAX_MESSAGES: u32 = 1000;

type PulsarResult = Result<(), ::pulsar::Error>;

/// Production connector: binary protocol client plus REST admin client
#[derive(Debug, Default, Clone, Copy)]
pub struct PulsarConnector;

#[async_trait]
impl Connector for PulsarConnector {
    async fn connect_client(
        &self,
        config: &DriverConfig,
    ) -> Result<Arc<dyn MessagingClient>, ClientError> {
        let client = PulsarMessagingClient::connect(config).await?;
        Ok(Arc::new(client))
    }

    async fn connect_admin(
        &self,
        config: &ClientSection,
    ) -> Result<Arc<dyn AdminClient>, ClientError> {
        let admin = HttpAdminClient::new(config)?;
        Ok(Arc::new(admin))
    }
}

/// Data plane client for one driver instance
pub struct PulsarMessagingClient {
    pulsar: RwLock<Option<Pulsar<TokioExecutor>>>,
}

impl PulsarMessagingClient {
    /// Connect to `service_url` with the configured TLS and authentication options
    ///
    /// The producer section's `pending_queue_size` bounds every producer's outbound queue.
    pub async fn connect(config: &DriverConfig) -> Result<Self, ClientError> {
        let client = &config.client;
        let mut builder = Pulsar::builder(client.service_url.clone(), TokioExecutor)
            .with_outbound_channel_size(config.producer.pending_queue_size);

        match client
            .credentials()
            .map_err(|e| ClientError::Connection(Box::new(e)))?
        {
            None => {}
            Some(Credentials::Token(token)) => {
                builder = builder.with_auth(Authentication {
                    name: "token".to_string(),
                    data: token.into_bytes(),
                });
            }
            Some(Credentials::OAuth2(oauth)) => {
                builder = builder.with_auth_provider(OAuth2Authentication::client_credentials(
                    OAuth2Params {
                        issuer_url: oauth.issuer_url,
                        credentials_url: oauth.private_key,
                        audience: oauth.audience,
                        scope: oauth.scope,
                    },
                ));
            }
        }

        if client.uses_tls() {
            builder = builder
                .with_allow_insecure_connection(client.tls_allow_insecure_connection)
                .with_tls_hostname_verification_enabled(client.tls_enable_hostname_verification);
            if let Some(path) = &client.tls_trust_certs_file_path {
                builder = builder
                    .with_certificate_chain_file(path)
                    .map_err(|e| ClientError::Connection(Box::new(e)))?;
            }
        }

        // io_threads and connections_per_broker have no counterpart in the pulsar crate;
        // all connections are multiplexed on the tokio runtime.
        debug!(
            io_threads = client.io_threads,
            connections_per_broker = client.connections_per_broker,
            "Threading options not applicable to this client"
        );

        let pulsar = builder
            .build()
            .await
            .map_err(|e| ClientError::Connection(Box::new(e)))?;

        Ok(Self {
            pulsar: RwLock::new(Some(pulsar)),
        })
    }

    async fn handle(&self) -> Result<Pulsar<TokioExecutor>, ClientError> {
        self.pulsar.read().await.clone().ok_or(ClientError::Closed)
    }
}

fn sub_type(kind: SubscriptionType) -> SubType {
    match kind {
        SubscriptionType::Exclusive => SubType::Exclusive,
        SubscriptionType::Shared => SubType::Shared,
        SubscriptionType::Failover => SubType::Failover,
        SubscriptionType::KeyShared => SubType::KeyShared,
    }
}

/// Producer options derived from the template
fn producer_options(template: &ProducerTemplate) -> ProducerOptions {
    let batching = template.batching_enabled;
    ProducerOptions {
        batch_size: batching.then_some(BATCH_MAX_MESSAGES),
        batch_timeout: batching.then_some(template.batching_max_publish_delay),
        block_queue_if_full: template.block_if_queue_full,
        ..Default::default()
    }
}

#[async_trait]
impl MessagingClient for PulsarMessagingClient {
    async fn create_producer(
        &self,
        topic: &str,
        template: &ProducerTemplate,
    ) -> Result<Box<dyn ProducerLink>, ClientError> {
        let pulsar = self.handle().await?;

        let producer = pulsar
            .producer()
            .with_topic(topic)
            .with_options(producer_options(template))
            .build()
            .await
            .map_err(|e| ClientError::Producer(Box::new(e)))?;

        debug!(topic = %topic, "Created producer");
        Ok(Box::new(PulsarProducerLink {
            topic: topic.to_string(),
            producer: Mutex::new(producer),
        }))
    }

    async fn subscribe(
        &self,
        descriptor: ConsumerDescriptor,
    ) -> Result<Arc<dyn ConsumerLink>, ClientError> {
        let pulsar = self.handle().await?;

        let consumer: Consumer<Vec<u8>, TokioExecutor> = pulsar
            .consumer()
            .with_topic(&descriptor.topic)
            .with_subscription_type(sub_type(descriptor.subscription_type))
            .with_subscription(&descriptor.subscription)
            .build()
            .await
            .map_err(|e| ClientError::Consumer(Box::new(e)))?;

        debug!(
            topic = %descriptor.topic,
            subscription = %descriptor.subscription,
            "Subscribed consumer"
        );
        Ok(Arc::new(PulsarConsumerLink::start(consumer, descriptor)))
    }

    async fn close(&self) -> Result<(), ClientError> {
        // Dropping the last handle tears down the broker connections
        if self.pulsar.write().await.take().is_some() {
            info!("Pulsar client closed");
        }
        Ok(())
    }
}

struct PulsarProducerLink {
    topic: String,
    producer: Mutex<Producer<TokioExecutor>>,
}

#[async_trait]
impl ProducerLink for PulsarProducerLink {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, key: Option<&str>, payload: &[u8]) -> Result<(), ClientError> {
        let message = producer::Message {
            payload: payload.to_vec(),
            partition_key: key.map(str::to_string),
            ..Default::default()
        };

        // Only enqueueing holds the lock; the receipt is awaited outside it
        let receipt = {
            let mut producer = self.producer.lock().await;
            producer
                .send_non_blocking(message)
                .await
                .map_err(|e| ClientError::Producer(Box::new(e)))?
        };

        receipt
            .await
            .map_err(|e| ClientError::Producer(Box::new(e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.producer
            .lock()
            .await
            .close()
            .await
            .map_err(|e| ClientError::Producer(Box::new(e)))
    }
}

enum ConsumerCommand {
    Unsubscribe(oneshot::Sender<PulsarResult>),
    Close(oneshot::Sender<PulsarResult>),
}

/// Handle to a consumer owned by its delivery task
struct PulsarConsumerLink {
    topic: String,
    subscription: String,
    commands: mpsc::Sender<ConsumerCommand>,
}

impl PulsarConsumerLink {
    fn start(consumer: Consumer<Vec<u8>, TokioExecutor>, descriptor: ConsumerDescriptor) -> Self {
        let (commands, receiver) = mpsc::channel(4);
        tokio::spawn(run_delivery(
            consumer,
            descriptor.subscription.clone(),
            descriptor.callback.clone(),
            receiver,
        ));

        Self {
            topic: descriptor.topic,
            subscription: descriptor.subscription,
            commands,
        }
    }

    async fn command(
        &self,
        make: impl FnOnce(oneshot::Sender<PulsarResult>) -> ConsumerCommand,
    ) -> Result<(), ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| ClientError::Closed)?;
        reply_rx
            .await
            .map_err(|_| ClientError::Closed)?
            .map_err(|e| ClientError::Consumer(Box::new(e)))
    }
}

#[async_trait]
impl ConsumerLink for PulsarConsumerLink {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn subscription(&self) -> &str {
        &self.subscription
    }

    async fn unsubscribe(&self) -> Result<(), ClientError> {
        self.command(ConsumerCommand::Unsubscribe).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.command(ConsumerCommand::Close).await
    }
}

/// Deliver messages until unsubscribed, closed, or every handle is dropped
async fn run_delivery(
    mut consumer: Consumer<Vec<u8>, TokioExecutor>,
    subscription: String,
    callback: Arc<dyn ConsumerCallback>,
    mut commands: mpsc::Receiver<ConsumerCommand>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(ConsumerCommand::Unsubscribe(reply)) => {
                        let _ = reply.send(consumer.unsubscribe().await);
                    }
                    Some(ConsumerCommand::Close(reply)) => {
                        let _ = reply.send(consumer.close().await);
                    }
                    None => {
                        let _ = consumer.close().await;
                    }
                }
                break;
            }
            next = consumer.next() => {
                match next {
                    Some(Ok(message)) => {
                        callback.message_received(
                            &message.payload.data,
                            message.metadata().publish_time,
                            &subscription,
                        );
                        // Redelivery after a lost ack is acceptable for benchmark traffic
                        if let Err(e) = consumer.ack(&message).await {
                            debug!(subscription = %subscription, error = %e, "Acknowledgment failed");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(subscription = %subscription, error = %e, "Consumer stream error");
                    }
                    None => break,
                }
            }
        }
    }
    debug!(subscription = %subscription, "Delivery task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sub_type_mapping() {
        assert_eq!(sub_type(SubscriptionType::Shared), SubType::Shared);
        assert_eq!(sub_type(SubscriptionType::Exclusive), SubType::Exclusive);
        assert_eq!(sub_type(SubscriptionType::Failover), SubType::Failover);
        assert_eq!(sub_type(SubscriptionType::KeyShared), SubType::KeyShared);
    }

    #[test]
    fn test_producer_options_with_batching() {
        let template = ProducerTemplate {
            batching_enabled: true,
            batching_max_publish_delay: Duration::from_millis(5),
            block_if_queue_full: true,
        };
        let options = producer_options(&template);
        assert_eq!(options.batch_size, Some(BATCH_MAX_MESSAGES));
        assert_eq!(options.batch_timeout, Some(Duration::from_millis(5)));
        assert!(options.block_queue_if_full);
    }

    #[test]
    fn test_producer_options_without_batching() {
        let template = ProducerTemplate {
            batching_enabled: false,
            batching_max_publish_delay: Duration::from_millis(5),
            block_if_queue_full: false,
        };
        let options = producer_options(&template);
        assert_eq!(options.batch_size, None);
        assert_eq!(options.batch_timeout, None);
        assert!(!options.block_queue_if_full);
    }

    #[tokio::test]
    async fn test_connect_rejects_unsupported_auth() {
        let mut config = DriverConfig::test_config();
        config.client.authentication.plugin = Some("athenz".to_string());
        let result = PulsarMessagingClient::connect(&config).await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }
}
