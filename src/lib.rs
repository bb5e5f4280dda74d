//! Pulsar Benchmark Driver
//!
//! Apache Pulsar driver for messaging benchmark harnesses.
//!
//! # Overview
//!
//! The harness talks to [`driver::BenchmarkDriver`] and never sees Pulsar specifics:
//! - Idempotent tenant/namespace provisioning that tolerates many workers at once
//! - Asynchronous producer and consumer creation
//! - Consumer rebinding (move a subscription to another topic) with timing capture
//! - Admin REST client and binary-protocol client behind swappable traits
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pulsar_bench_driver::driver::{BenchmarkDriver, NoopStatsSink, PulsarBenchmarkDriver};
//! use pulsar_bench_driver::testing::RecordingCallback;
//! use pulsar_bench_driver::DriverConfig;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DriverConfig::load_from_file(Path::new("pulsar.toml"))?;
//!
//! let mut driver = PulsarBenchmarkDriver::new();
//! driver.initialize(config, Arc::new(NoopStatsSink)).await?;
//!
//! let prefix = driver.topic_name_prefix()?;
//! let (from, to) = (format!("{prefix}topic-0"), format!("{prefix}topic-1"));
//!
//! let consumer = driver
//!     .create_consumer(&from, "sub-0", Arc::new(RecordingCallback::new()))
//!     .await?;
//! driver.subscribe_consumer_to_topic(&consumer, &to).await?;
//! println!("rebind took {:.3} ms", driver.subscription_change_time(&consumer));
//!
//! driver.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod observability;
pub mod testing;

pub use client::{AdminClient, AdminError, ClientError, Connector, MessagingClient};
pub use config::*;
pub use driver::{
    BenchmarkDriver, ConsumerCallback, ConsumerHandle, NoopStatsSink, ProducerHandle,
    PulsarBenchmarkDriver, StatsSink,
};
pub use error::{DriverError, DriverResult};
