//! Pulsar benchmark driver - command line entry point
//!
//! Validates configuration, provisions the benchmark namespace, and probes rebind
//! latency against a live cluster without a full benchmark harness.

use clap::{Parser, Subcommand};
use pulsar_bench_driver::config::DriverConfig;
use pulsar_bench_driver::driver::{
    BenchmarkDriver, ConsumerCallback, NoopStatsSink, PulsarBenchmarkDriver,
};
use pulsar_bench_driver::observability::logging::{init_default_logging, init_logging, LogFormat};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, Level};

const DEFAULT_CONFIG_PATHS: &[&str] = &["pulsar.toml", "config/pulsar.toml"];

/// Counts deliveries seen by the probe consumer
#[derive(Default)]
struct CountingCallback {
    received: AtomicU64,
}

impl ConsumerCallback for CountingCallback {
    fn message_received(&self, _payload: &[u8], _publish_timestamp_ms: u64, _subscription: &str) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }
}

/// Apache Pulsar benchmark driver
#[derive(Parser)]
#[command(name = "pulsar-bench-driver")]
#[command(about = "Provision Pulsar namespaces and probe consumer rebind latency")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "PULSAR_BENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration
    Config {
        /// Print the effective configuration with credentials masked
        #[arg(long)]
        show: bool,
    },
    /// Provision tenant and namespace, then print the topic name prefix
    Provision,
    /// Move one subscription back and forth between two topics and report the mean time
    ProbeRebind {
        /// Topic the consumer starts on (bare names get the topic prefix)
        #[arg(long)]
        from: String,
        /// Topic the consumer is moved to
        #[arg(long)]
        to: String,
        /// Number of rebinds
        #[arg(long, default_value_t = 10)]
        iterations: u32,
        /// Subscription name
        #[arg(long, default_value = "rebind-probe")]
        subscription: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, true),
    }

    info!(
        "Starting Pulsar benchmark driver v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Provision => provision(config).await,
        Commands::ProbeRebind {
            from,
            to,
            iterations,
            subscription,
        } => probe_rebind(config, &from, &to, iterations, &subscription).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<DriverConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(DriverConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(DriverConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create pulsar.toml".into())
}

fn handle_config_command(
    config: &DriverConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");
    if show {
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }
    Ok(())
}

async fn provision(config: DriverConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut driver = PulsarBenchmarkDriver::new();
    driver
        .initialize(config, Arc::new(NoopStatsSink))
        .await?;

    println!("namespace: {}", driver.namespace().unwrap_or_default());
    println!("topic prefix: {}", driver.topic_name_prefix()?);

    driver.close().await?;
    Ok(())
}

/// Fully qualify a topic name unless it already carries a domain
fn qualify(prefix: &str, topic: &str) -> String {
    if topic.contains("://") {
        topic.to_string()
    } else {
        format!("{prefix}{topic}")
    }
}

async fn probe_rebind(
    config: DriverConfig,
    from: &str,
    to: &str,
    iterations: u32,
    subscription: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut driver = PulsarBenchmarkDriver::new();
    driver.initialize(config, Arc::new(NoopStatsSink)).await?;

    let prefix = driver.topic_name_prefix()?;
    let topics = [qualify(&prefix, from), qualify(&prefix, to)];

    let callback = Arc::new(CountingCallback::default());
    let consumer = driver
        .create_consumer(&topics[0], subscription, callback.clone())
        .await?;

    for i in 0..iterations {
        let target = &topics[(i as usize + 1) % 2];
        driver.subscribe_consumer_to_topic(&consumer, target).await?;
    }

    let samples = driver.subscription_change_samples(subscription);
    println!(
        "subscription {}: {} of {} rebinds succeeded, mean change time {:.3} ms, {} messages received",
        subscription,
        samples.len(),
        iterations,
        driver.subscription_change_time(&consumer),
        callback.received.load(Ordering::Relaxed)
    );

    if let Err(e) = consumer.close().await {
        error!("Failed to close probe consumer: {}", e);
    }
    driver.close().await?;
    Ok(())
}
