//! Concurrent per-subscription state
//!
//! Both maps are sharded (`DashMap`), so callers working on different subscription
//! names do not serialize on a single lock.

use crate::client::ConsumerDescriptor;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct RegistryEntry {
    descriptor: ConsumerDescriptor,
    /// Serializes rebinds of this subscription name
    gate: Arc<Mutex<()>>,
}

/// Subscription name -> descriptor used to (re)create its consumer
#[derive(Default)]
pub struct ConsumerRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the descriptor; an existing rebind gate is kept
    pub fn register(&self, descriptor: ConsumerDescriptor) {
        self.entries
            .entry(descriptor.subscription.clone())
            .and_modify(|entry| entry.descriptor = descriptor.clone())
            .or_insert_with(|| RegistryEntry {
                descriptor,
                gate: Arc::new(Mutex::new(())),
            });
    }

    pub fn descriptor(&self, subscription: &str) -> Option<ConsumerDescriptor> {
        self.entries
            .get(subscription)
            .map(|entry| entry.descriptor.clone())
    }

    /// Rebind gate for a known subscription name
    pub fn gate(&self, subscription: &str) -> Option<Arc<Mutex<()>>> {
        self.entries.get(subscription).map(|entry| entry.gate.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Forget every subscription; used when the driver shuts down
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Subscription name -> rebind durations in milliseconds
#[derive(Debug, Default)]
pub struct SubscriptionTimings {
    samples: DashMap<String, Vec<f64>>,
}

impl SubscriptionTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample; the shard write lock makes the push atomic for readers
    pub fn record(&self, subscription: &str, millis: f64) {
        self.samples
            .entry(subscription.to_string())
            .or_default()
            .push(millis.max(0.0));
    }

    /// Arithmetic mean of the recorded samples, `None` if there are none
    pub fn average(&self, subscription: &str) -> Option<f64> {
        let samples = self.samples.get(subscription)?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Snapshot of the samples recorded so far
    pub fn samples(&self, subscription: &str) -> Vec<f64> {
        self.samples
            .get(subscription)
            .map(|samples| samples.value().clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.samples.clear();
    }
}
