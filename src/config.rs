//! Driver configuration
//!
//! Strongly typed configuration for the Pulsar benchmark driver. The harness (or the
//! bundled CLI) loads it once from TOML; the driver only ever reads it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Complete driver configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverConfig {
    pub client: ClientSection,
    #[serde(default)]
    pub producer: ProducerSection,
}

/// Connection, provisioning and naming settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Binary protocol endpoint, e.g. `pulsar://localhost:6650`
    pub service_url: String,
    /// Admin REST endpoint, e.g. `http://localhost:8080`
    pub http_url: String,
    #[serde(default = "default_io_threads")]
    pub io_threads: u32,
    #[serde(default = "default_connections_per_broker")]
    pub connections_per_broker: u32,
    pub cluster_name: String,
    /// `tenant/namespace` the benchmark namespace is derived from
    pub namespace_prefix: String,
    /// Generate a fresh namespace (`prefix-<suffix>`) instead of using the prefix as-is
    #[serde(default = "default_true")]
    pub create_namespace: bool,
    /// Topic domain used in fully qualified names (`persistent` or `non-persistent`)
    #[serde(default = "default_topic_type")]
    pub topic_type: String,
    #[serde(default)]
    pub tls_allow_insecure_connection: bool,
    #[serde(default)]
    pub tls_enable_hostname_verification: bool,
    pub tls_trust_certs_file_path: Option<String>,
    #[serde(default)]
    pub authentication: AuthenticationSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

/// Authentication plugin name and opaque credential data
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthenticationSection {
    pub plugin: Option<String>,
    pub data: Option<String>,
}

/// Namespace persistence policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceSection {
    pub ensemble_size: u32,
    pub write_quorum: u32,
    pub ack_quorum: u32,
    #[serde(default)]
    pub deduplication_enabled: bool,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            ensemble_size: 3,
            write_quorum: 3,
            ack_quorum: 2,
            deduplication_enabled: false,
        }
    }
}

/// Producer batching and backpressure settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerSection {
    #[serde(default = "default_true")]
    pub batching_enabled: bool,
    #[serde(default = "default_batching_delay")]
    pub batching_max_publish_delay_ms: u64,
    /// Block the sender when the outbound queue is full instead of failing
    #[serde(default = "default_true")]
    pub block_if_queue_full: bool,
    #[serde(default = "default_pending_queue_size")]
    pub pending_queue_size: usize,
}

impl Default for ProducerSection {
    fn default() -> Self {
        Self {
            batching_enabled: true,
            batching_max_publish_delay_ms: default_batching_delay(),
            block_if_queue_full: true,
            pending_queue_size: default_pending_queue_size(),
        }
    }
}

fn default_io_threads() -> u32 {
    8
}

fn default_connections_per_broker() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

fn default_topic_type() -> String {
    "persistent".to_string()
}

fn default_batching_delay() -> u64 {
    1
}

fn default_pending_queue_size() -> usize {
    10_000
}

/// Resolved credentials shared by the data plane and the admin client
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    Token(String),
    OAuth2(OAuth2Credentials),
}

/// Client credentials flow parameters, as found in `authentication.data`
///
/// `private_key` points at the key file holding `client_id` and `client_secret`,
/// either as a `file://` URL, a `data:application/json;base64,` URL or a plain path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Credentials {
    pub issuer_url: String,
    pub private_key: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unsupported authentication plugin: {0}")]
    UnsupportedAuth(String),
}

impl DriverConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DriverConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the driver cannot act on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let client = &self.client;

        parse_endpoint(&client.service_url, &["pulsar", "pulsar+ssl"])?;
        parse_endpoint(&client.http_url, &["http", "https"])?;

        if client.tenant().is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "namespace_prefix '{}' must start with a tenant segment",
                client.namespace_prefix
            )));
        }
        if client.cluster_name.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "cluster_name must not be empty".to_string(),
            ));
        }

        let p = &client.persistence;
        if p.ack_quorum == 0 || p.ack_quorum > p.write_quorum || p.write_quorum > p.ensemble_size
        {
            return Err(ConfigError::InvalidConfig(format!(
                "persistence quorums must satisfy 0 < ack ({}) <= write ({}) <= ensemble ({})",
                p.ack_quorum, p.write_quorum, p.ensemble_size
            )));
        }

        if self.producer.pending_queue_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "producer.pending_queue_size must be greater than zero".to_string(),
            ));
        }

        client.credentials()?;
        Ok(())
    }

    /// Copy of the configuration that is safe to log
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.client.authentication.data.is_some() {
            copy.client.authentication.data = Some("***".to_string());
        }
        copy
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[client]
service_url = "pulsar://localhost:6650"
http_url = "http://localhost:8080"
cluster_name = "standalone"
namespace_prefix = "bench-tenant/bench-ns"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl ClientSection {
    /// Tenant is the first path segment of the namespace prefix
    pub fn tenant(&self) -> &str {
        self.namespace_prefix.split('/').next().unwrap_or_default()
    }

    pub fn uses_tls(&self) -> bool {
        self.service_url.starts_with("pulsar+ssl")
    }

    pub fn admin_uses_tls(&self) -> bool {
        self.http_url.starts_with("https")
    }

    /// Resolve the configured authentication plugin, if any
    pub fn credentials(&self) -> Result<Option<Credentials>, ConfigError> {
        let plugin = match self.authentication.plugin.as_deref() {
            Some(plugin) if !plugin.trim().is_empty() => plugin.trim(),
            _ => return Ok(None),
        };

        let data = self.authentication.data.as_deref().unwrap_or_default().trim();

        if plugin == "token" || plugin.ends_with("AuthenticationToken") {
            let token = data.strip_prefix("token:").unwrap_or(data).trim();
            if token.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "token authentication requires non-empty authentication.data".to_string(),
                ));
            }
            return Ok(Some(Credentials::Token(token.to_string())));
        }

        if plugin == "oauth2" || plugin.ends_with("AuthenticationOAuth2") {
            let oauth: OAuth2Credentials = serde_json::from_str(data).map_err(|e| {
                ConfigError::InvalidConfig(format!(
                    "oauth2 authentication.data must be a JSON object with issuerUrl and privateKey: {e}"
                ))
            })?;
            if oauth.issuer_url.trim().is_empty() || oauth.private_key.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "oauth2 authentication requires issuerUrl and privateKey".to_string(),
                ));
            }
            return Ok(Some(Credentials::OAuth2(oauth)));
        }

        Err(ConfigError::UnsupportedAuth(plugin.to_string()))
    }
}

fn parse_endpoint(raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidConfig(format!("invalid endpoint '{raw}': {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidConfig(format!(
            "endpoint '{raw}' must use one of {schemes:?}"
        )));
    }
    Ok(url)
}
