//! Idempotent tenant/namespace provisioning
//!
//! Many workers may provision the same tenant concurrently, so the whole sequence
//! restarts whenever the admin API reports a conflict. Any other admin error is fatal.
//! There is no backoff and no attempt cap: conflicts are assumed to stop once the shared
//! infrastructure converges. A tenant that conflicts forever keeps `initialize` spinning.

use crate::client::{AdminClient, AdminError, BacklogQuota, PersistencePolicies, TenantInfo};
use crate::config::ClientSection;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use tracing::{debug, info, warn};

/// Namespace selection across provisioning attempts
///
/// Once a generated namespace has been created, later attempts reuse it instead of
/// creating another one. The input configuration is never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceState {
    /// A fresh namespace still has to be generated and created
    Pending,
    /// The namespace exists (created by us, or pre-provisioned via the prefix)
    Created(String),
}

impl NamespaceState {
    pub fn initial(config: &ClientSection) -> Self {
        if config.create_namespace {
            NamespaceState::Pending
        } else {
            NamespaceState::Created(config.namespace_prefix.clone())
        }
    }
}

/// Outcome of a successful provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub namespace: String,
    /// Number of times the full sequence was started
    pub attempts: u32,
}

/// Random namespace suffix: 5 random bytes, URL-safe base64 without padding
pub fn random_suffix() -> String {
    let bytes: [u8; 5] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Run the provisioning sequence until it succeeds or fails with a non-conflict error
pub async fn provision(
    admin: &dyn AdminClient,
    config: &ClientSection,
    persistence_policies: &PersistencePolicies,
) -> Result<Provisioned, AdminError> {
    let mut state = NamespaceState::initial(config);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match provision_once(admin, config, persistence_policies, &mut state).await {
            Ok(namespace) => return Ok(Provisioned { namespace, attempts }),
            Err(e) if e.is_conflict() => {
                warn!(attempt = attempts, error = %e, "Conflict while provisioning, restarting");
            }
            Err(e) => return Err(e),
        }
    }
}

async fn provision_once(
    admin: &dyn AdminClient,
    config: &ClientSection,
    persistence_policies: &PersistencePolicies,
    state: &mut NamespaceState,
) -> Result<String, AdminError> {
    let tenant = config.tenant();
    let cluster = &config.cluster_name;

    if !admin.list_tenants().await?.iter().any(|t| t == tenant) {
        let info = TenantInfo {
            admin_roles: Vec::new(),
            allowed_clusters: vec![cluster.clone()],
        };
        match admin.create_tenant(tenant, &info).await {
            Ok(()) => {}
            // Another worker created it between our list and create
            Err(e) if e.is_conflict() => debug!(tenant = %tenant, "Tenant already exists"),
            Err(e) => return Err(e),
        }
    }
    info!(tenant = %tenant, cluster = %cluster, "Tenant ready");

    let namespace = match state {
        NamespaceState::Created(namespace) => namespace.clone(),
        NamespaceState::Pending => {
            let namespace = format!("{}-{}", config.namespace_prefix, random_suffix());
            admin.create_namespace(&namespace).await?;
            info!(namespace = %namespace, "Created namespace");
            *state = NamespaceState::Created(namespace.clone());
            namespace
        }
    };

    admin
        .set_persistence(&namespace, persistence_policies)
        .await?;
    admin
        .set_backlog_quota(&namespace, &BacklogQuota::unbounded())
        .await?;
    admin
        .set_deduplication(&namespace, config.persistence.deduplication_enabled)
        .await?;

    info!(
        tenant = %tenant,
        cluster = %cluster,
        namespace = %namespace,
        ensemble = persistence_policies.ensemble_size,
        write_quorum = persistence_policies.write_quorum,
        ack_quorum = persistence_policies.ack_quorum,
        deduplication = config.persistence.deduplication_enabled,
        "Applied namespace policies"
    );

    Ok(namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;

    #[test]
    fn test_random_suffix_shape() {
        let suffix = random_suffix();
        // 5 bytes -> 7 base64 characters without padding
        assert_eq!(suffix.len(), 7);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_random_suffixes_differ() {
        let a = random_suffix();
        let b = random_suffix();
        let c = random_suffix();
        assert!(a != b || b != c);
    }

    #[test]
    fn test_initial_state_follows_flag() {
        let mut config = DriverConfig::test_config().client;
        assert_eq!(NamespaceState::initial(&config), NamespaceState::Pending);

        config.create_namespace = false;
        assert_eq!(
            NamespaceState::initial(&config),
            NamespaceState::Created("bench-tenant/bench-ns".to_string())
        );
    }
}
