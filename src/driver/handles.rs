//! Producer and consumer handles returned to the harness
//!
//! The driver keeps no ownership of these; the harness closes them.

use crate::client::{ClientError, ConsumerLink, ProducerLink};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A live producer bound to one topic
pub struct ProducerHandle {
    link: Box<dyn ProducerLink>,
}

impl ProducerHandle {
    pub fn new(link: Box<dyn ProducerLink>) -> Self {
        Self { link }
    }

    pub fn topic(&self) -> &str {
        self.link.topic()
    }

    /// Publish one message; resolves when the broker acknowledged it
    pub async fn send(&self, key: Option<&str>, payload: &[u8]) -> Result<(), ClientError> {
        self.link.send(key, payload).await
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.link.close().await
    }
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("topic", &self.topic())
            .finish()
    }
}

/// A live consumer and the subscription name it is bound to
///
/// Clones share the same slot: when a rebind succeeds the slot is pointed at the
/// replacement consumer, so every clone follows the subscription to its new topic.
#[derive(Clone)]
pub struct ConsumerHandle {
    subscription: Arc<str>,
    link: Arc<RwLock<Arc<dyn ConsumerLink>>>,
}

impl ConsumerHandle {
    pub fn new(link: Arc<dyn ConsumerLink>) -> Self {
        Self {
            subscription: Arc::from(link.subscription()),
            link: Arc::new(RwLock::new(link)),
        }
    }

    pub fn subscription_name(&self) -> &str {
        &self.subscription
    }

    /// Topic of the consumer currently behind this handle
    pub async fn topic(&self) -> String {
        self.current().await.topic().to_string()
    }

    pub async fn unsubscribe(&self) -> Result<(), ClientError> {
        self.current().await.unsubscribe().await
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.current().await.close().await
    }

    pub(crate) async fn current(&self) -> Arc<dyn ConsumerLink> {
        self.link.read().await.clone()
    }

    pub(crate) async fn replace(&self, link: Arc<dyn ConsumerLink>) {
        *self.link.write().await = link;
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubConsumer {
        topic: String,
        unsubscribes: AtomicU32,
    }

    impl StubConsumer {
        fn new(topic: &str) -> Arc<Self> {
            Arc::new(Self {
                topic: topic.to_string(),
                unsubscribes: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ConsumerLink for StubConsumer {
        fn topic(&self) -> &str {
            &self.topic
        }

        fn subscription(&self) -> &str {
            "sub-1"
        }

        async fn unsubscribe(&self) -> Result<(), ClientError> {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<(), ClientError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_clones_follow_replacement() {
        let first = StubConsumer::new("topic-a");
        let second = StubConsumer::new("topic-b");

        let handle = ConsumerHandle::new(first.clone());
        let clone = handle.clone();
        assert_eq!(clone.topic().await, "topic-a");

        handle.replace(second.clone()).await;
        assert_eq!(clone.topic().await, "topic-b");
        assert_eq!(clone.subscription_name(), "sub-1");

        clone.unsubscribe().await.unwrap();
        assert_eq!(first.unsubscribes.load(Ordering::SeqCst), 0);
        assert_eq!(second.unsubscribes.load(Ordering::SeqCst), 1);
    }
}
